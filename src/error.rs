//! Error types for uastack.

use std::fmt;
use std::io;

use crate::types::StatusCode;

/// Result type for uastack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error from the transport
    Io(io::Error),
    /// Configuration error
    Config(ConfigError),
    /// Malformed bytes from the peer
    Decoding(StatusCode),
    /// A service-level fault returned by the engine
    Fault(StatusCode),
    /// The secure channel was closed
    ChannelClosed(StatusCode),
    /// The session was closed while requests were outstanding
    SessionClosed,
    /// The engine has shut down
    EngineShutdown,
}

impl Error {
    /// The status code a peer should see for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Io(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            Error::Config(_) => StatusCode::BAD_CONFIGURATION_ERROR,
            Error::Decoding(status) | Error::Fault(status) | Error::ChannelClosed(status) => {
                *status
            }
            Error::SessionClosed => StatusCode::BAD_SESSION_CLOSED,
            Error::EngineShutdown => StatusCode::BAD_SHUTDOWN,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Decoding(status) => write!(f, "Decoding error: {}", status),
            Error::Fault(status) => write!(f, "Service fault: {}", status),
            Error::ChannelClosed(status) => write!(f, "Secure channel closed: {}", status),
            Error::SessionClosed => write!(f, "Session closed"),
            Error::EngineShutdown => write!(f, "Engine has shut down"),
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

/// Configuration error
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
