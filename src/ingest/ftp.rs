use super::remote::{ByteStream, RemoteConnector, RemoteFile, RemoteSession};
use crate::db::models::RemoteDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::net::ToSocketAddrs;
use std::time::Duration;
use suppaftp::list::File;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};

/// FTP / explicit FTPS connector. The blocking client runs on tokio's
/// blocking pool; one session never issues two commands at once.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl FtpConnector {
    /// `io_timeout` bounds every read and write on the control connection
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

#[async_trait]
impl RemoteConnector for FtpConnector {
    async fn connect(&self, remote: &RemoteDescriptor) -> Result<Box<dyn RemoteSession>> {
        let remote = remote.clone();
        let (connect_timeout, io_timeout) = (self.connect_timeout, self.io_timeout);
        let address = remote.address();

        let stream = tokio::task::spawn_blocking(move || open(&remote, connect_timeout, io_timeout))
            .await
            .map_err(|e| Error::Connection(format!("FTP connect task failed: {}", e)))??;

        debug!("Connected to {}", address);
        Ok(Box::new(FtpSession {
            stream: Some(stream),
            address,
        }))
    }
}

fn open(
    remote: &RemoteDescriptor,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<NativeTlsFtpStream> {
    let addr = remote
        .address()
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("Failed to resolve {}: {}", remote.address(), e)))?
        .next()
        .ok_or_else(|| Error::Connection(format!("No address for {}", remote.address())))?;

    let mut stream = NativeTlsFtpStream::connect_timeout(addr, connect_timeout)?;

    // A stalled server must not pin a blocking thread forever
    let socket = stream.get_ref();
    socket.set_read_timeout(Some(io_timeout))?;
    socket.set_write_timeout(Some(io_timeout))?;

    if remote.secure {
        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(remote.accept_invalid_certs)
            .danger_accept_invalid_hostnames(remote.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Connection(format!("Failed to build TLS connector: {}", e)))?;
        stream = stream.into_secure(NativeTlsConnector::from(tls), &remote.host)?;
    }

    stream
        .login(&remote.user, &remote.password)
        .map_err(|e| Error::Connection(format!("Login to {} failed: {}", remote.address(), e)))?;
    stream.transfer_type(FileType::Binary)?;

    Ok(stream)
}

struct FtpSession {
    stream: Option<NativeTlsFtpStream>,
    address: String,
}

impl FtpSession {
    /// Move the stream onto the blocking pool for one command and take it back
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| Error::Connection(format!("Session to {} is closed", self.address)))?;

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|e| Error::Connection(format!("FTP task failed: {}", e)))?;

        self.stream = Some(stream);
        result
    }
}

fn to_remote_file(file: &File) -> RemoteFile {
    RemoteFile {
        name: file.name().to_string(),
        modified: DateTime::<Utc>::from(file.modified()),
        size: file.size() as u64,
        is_file: file.is_file(),
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn change_directory(&mut self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.with_stream(move |s| {
            s.cwd(&path)
                .map_err(|e| Error::NotFound(format!("Directory {}: {}", path, e)))
        })
        .await
    }

    async fn current_directory(&mut self) -> Result<String> {
        self.with_stream(|s| s.pwd().map_err(|e| Error::Connection(format!("PWD failed: {}", e))))
            .await
    }

    async fn list(&mut self) -> Result<Vec<RemoteFile>> {
        let lines = self
            .with_stream(|s| s.list(None).map_err(|e| Error::Listing(e.to_string())))
            .await?;

        let mut files = Vec::with_capacity(lines.len());
        for line in lines {
            match line.parse::<File>() {
                Ok(file) => files.push(to_remote_file(&file)),
                Err(e) => debug!("Ignoring unparsable listing line {:?}: {}", line, e),
            }
        }
        Ok(files)
    }

    async fn open_stream(&mut self, name: &str) -> Result<ByteStream> {
        let name = name.to_string();
        let buffer = self
            .with_stream(move |s| {
                s.retr_as_buffer(&name)
                    .map_err(|e| Error::Io(format!("Failed to retrieve {}: {}", name, e)))
            })
            .await?;
        Ok(Box::new(buffer))
    }

    async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let address = self.address.clone();
        let result = tokio::task::spawn_blocking(move || stream.quit()).await;
        match result {
            Ok(Ok(())) => debug!("Closed FTP session to {}", address),
            Ok(Err(e)) => warn!("Error closing FTP session to {}: {}", address, e),
            Err(e) => warn!("FTP close task failed for {}: {}", address, e),
        }
    }
}
