use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Asset resolution error: {0}")]
    AssetResolution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Already running: {0}")]
    AlreadyRunning(String),
}

impl Error {
    /// Row-level errors are logged and skipped; they never abort a file or a pass.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Error::MalformedTimestamp(_)
                | Error::MalformedRow(_)
                | Error::Persistence(_)
                | Error::AssetResolution(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::MalformedRow(e.to_string())
    }
}

impl From<suppaftp::FtpError> for Error {
    fn from(e: suppaftp::FtpError) -> Self {
        match e {
            suppaftp::FtpError::ConnectionError(io) => Error::Connection(io.to_string()),
            suppaftp::FtpError::SecureError(msg) => Error::Connection(msg),
            other => Error::Listing(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
