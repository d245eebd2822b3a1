use crate::db::models::RemoteDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Entry of a remote directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub is_file: bool,
}

impl RemoteFile {
    pub fn is_csv(&self) -> bool {
        self.is_file && self.name.to_lowercase().ends_with(".csv")
    }
}

pub type ByteStream = Box<dyn Read + Send>;

/// Opens sessions against an area's file server
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, remote: &RemoteDescriptor) -> Result<Box<dyn RemoteSession>>;
}

/// An open connection. Callers must `close` it on every exit path.
#[async_trait]
pub trait RemoteSession: Send {
    async fn change_directory(&mut self, path: &str) -> Result<()>;

    /// Absolute path of the current directory
    async fn current_directory(&mut self) -> Result<String>;

    /// Entries of the current directory, in whatever order the server returns them
    async fn list(&mut self) -> Result<Vec<RemoteFile>>;

    /// Content of a file in the current directory
    async fn open_stream(&mut self, name: &str) -> Result<ByteStream>;

    async fn close(&mut self);
}

/// CSV files of a listing, oldest modification first. Equal times fall back to name order.
pub fn order_csv_files(entries: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut files: Vec<RemoteFile> = entries.into_iter().filter(RemoteFile::is_csv).collect();
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    files
}

/// File server held in memory. Directories are `/`-separated absolute paths.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    dirs: Arc<Mutex<HashMap<String, Vec<(RemoteFile, Vec<u8>)>>>>,
    refuse_connections: Arc<AtomicBool>,
    failing_files: Arc<Mutex<HashSet<String>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite `dir/name`
    pub fn put_file(&self, dir: &str, name: &str, modified: DateTime<Utc>, content: impl Into<Vec<u8>>) {
        let content = content.into();
        let file = RemoteFile {
            name: name.to_string(),
            modified,
            size: content.len() as u64,
            is_file: true,
        };
        let mut dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
        let entries = dirs.entry(normalize_path(dir)).or_default();
        entries.retain(|(f, _)| f.name != name);
        entries.push((file, content));
    }

    /// Append to `dir/name`, the way cameras grow the daily file
    pub fn append_file(&self, dir: &str, name: &str, modified: DateTime<Utc>, content: &str) {
        let existing = {
            let dirs = self.dirs.lock().unwrap_or_else(|e| e.into_inner());
            dirs.get(&normalize_path(dir))
                .and_then(|entries| entries.iter().find(|(f, _)| f.name == name))
                .map(|(_, c)| c.clone())
                .unwrap_or_default()
        };
        let mut content_bytes = existing;
        content_bytes.extend_from_slice(content.as_bytes());
        self.put_file(dir, name, modified, content_bytes);
    }

    /// Make every following `connect` fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Make retrieving any file called `name` fail, or succeed again
    pub fn fail_open(&self, name: &str, fail: bool) {
        let mut failing = self.failing_files.lock().unwrap_or_else(|e| e.into_inner());
        if fail {
            failing.insert(name.to_string());
        } else {
            failing.remove(name);
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

#[async_trait]
impl RemoteConnector for MemoryRemote {
    async fn connect(&self, remote: &RemoteDescriptor) -> Result<Box<dyn RemoteSession>> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!("Connection refused by {}", remote.address())));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            remote: self.clone(),
            cwd: "/".to_string(),
            closed: false,
        }))
    }
}

struct MemorySession {
    remote: MemoryRemote,
    cwd: String,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("Session is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn change_directory(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        let target = if path.starts_with('/') {
            normalize_path(path)
        } else {
            normalize_path(&format!("{}/{}", self.cwd, path))
        };

        let dirs = self.remote.dirs.lock().unwrap_or_else(|e| e.into_inner());
        let exists = target == "/"
            || dirs
                .keys()
                .any(|d| d == &target || d.starts_with(&format!("{}/", target)));
        if !exists {
            return Err(Error::NotFound(format!("Directory {} not found", target)));
        }
        drop(dirs);

        self.cwd = target;
        Ok(())
    }

    async fn current_directory(&mut self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.cwd.clone())
    }

    async fn list(&mut self) -> Result<Vec<RemoteFile>> {
        self.ensure_open()?;
        let dirs = self.remote.dirs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(dirs
            .get(&self.cwd)
            .map(|entries| entries.iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default())
    }

    async fn open_stream(&mut self, name: &str) -> Result<ByteStream> {
        self.ensure_open()?;
        let failing = self
            .remote
            .failing_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name);
        if failing {
            return Err(Error::Io(format!("Failed to retrieve {}/{}", self.cwd, name)));
        }

        let dirs = self.remote.dirs.lock().unwrap_or_else(|e| e.into_inner());
        let content = dirs
            .get(&self.cwd)
            .and_then(|entries| entries.iter().find(|(f, _)| f.name == name))
            .map(|(_, c)| c.clone())
            .ok_or_else(|| Error::NotFound(format!("{}/{}", self.cwd, name)))?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.remote.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn file(name: &str, modified: DateTime<Utc>, is_file: bool) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            modified,
            size: 0,
            is_file,
        }
    }

    #[test]
    fn test_order_csv_files_by_modification_time() {
        let t = Utc::now();
        let ordered = order_csv_files(vec![
            file("2025-04-03.csv", t, true),
            file("2025-04-02.CSV", t - Duration::hours(1), true),
            file("2025-04-02", t - Duration::hours(2), false),
            file("notes.txt", t - Duration::hours(3), true),
            file("2025-04-01.csv", t, true),
        ]);
        let names: Vec<&str> = ordered.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["2025-04-02.CSV", "2025-04-01.csv", "2025-04-03.csv"]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/cam/2025-04-02/.."), "/cam");
        assert_eq!(normalize_path("cam//x/"), "/cam/x");
        assert_eq!(normalize_path(".."), "/");
    }

    #[tokio::test]
    async fn test_memory_session_navigation() -> anyhow::Result<()> {
        let remote = MemoryRemote::new();
        remote.put_file("/cam", "2025-04-02.csv", Utc::now(), "a;b;c\n");
        remote.put_file("/cam/2025-04-02", "ABC.jpg", Utc::now(), vec![1u8, 2, 3]);

        let descriptor = RemoteDescriptor {
            host: "localhost".to_string(),
            port: 21,
            user: "u".to_string(),
            password: "p".to_string(),
            secure: false,
            accept_invalid_certs: false,
            folder: "cam".to_string(),
        };

        let mut session = remote.connect(&descriptor).await?;
        session.change_directory("cam").await?;
        assert_eq!(session.list().await?.len(), 1);

        session.change_directory("2025-04-02").await?;
        let mut bytes = Vec::new();
        session.open_stream("ABC.jpg").await?.read_to_end(&mut bytes)?;
        assert_eq!(bytes, vec![1, 2, 3]);

        session.change_directory("..").await?;
        assert_eq!(session.current_directory().await?, "/cam");
        assert!(session.change_directory("missing").await.is_err());

        remote.fail_open("2025-04-02.csv", true);
        assert!(matches!(
            session.open_stream("2025-04-02.csv").await,
            Err(Error::Io(_))
        ));
        remote.fail_open("2025-04-02.csv", false);
        assert!(session.open_stream("2025-04-02.csv").await.is_ok());
        session.close().await;

        assert_eq!(remote.sessions_opened(), 1);
        assert_eq!(remote.sessions_closed(), 1);
        Ok(())
    }
}
