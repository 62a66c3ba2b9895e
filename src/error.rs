//! Error types for dslink.

use std::fmt;
use std::io;

/// Result type for dslink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error from network operations
    Io(io::Error),
    /// A port setter was handed 0, which the wire cannot carry
    InvalidPort(u16),
    /// The engine task has shut down and no longer accepts commands
    LinkClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidPort(p) => write!(f, "Invalid port number: {}", p),
            Error::LinkClosed => write!(f, "Socket engine has shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
