use std::fmt;

#[derive(Debug)]
pub enum Error {
    Connect(String),
    Timeout { path: String },
    Protocol { path: String, status: String },
    Encryption { path: String },
    DeviceData { path: String },
    NotSupported(String),
    Http(reqwest::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Error {
    /// Whether the next request has a fair chance of succeeding.
    ///
    /// Encryption failures almost always mean wrong credentials, so retrying
    /// them blindly only hammers the gateway.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Encryption { .. } | Error::NotSupported(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect(msg) => write!(f, "cannot connect: {msg}"),
            Error::Timeout { path } => write!(f, "no reply for {path} before timeout"),
            Error::Protocol { path, status } => write!(f, "device rejected {path}: {status}"),
            Error::Encryption { path } => write!(f, "cannot decrypt reply for {path}"),
            Error::DeviceData { path } => write!(f, "no data in reply for {path}"),
            Error::NotSupported(what) => write!(f, "not supported: {what}"),
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
