//! Error types
//!
//! A single error type is shared by the transport and both relay variants.

use std::io;

use crate::frame::codec::FrameError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for channel and relay operations
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure not tied to a specific endpoint
    Io(io::Error),
    /// Could not bind a publish endpoint
    Bind { endpoint: String, source: io::Error },
    /// Could not connect a subscription to its producer
    Connect { endpoint: String, source: io::Error },
    /// Publisher greeting missing or malformed
    Handshake { endpoint: String, reason: String },
    /// Wire framing violated
    Frame(FrameError),
    /// Peer closed the connection
    Disconnected { endpoint: String },
    /// Invalid or incomplete configuration
    Config(String),
    /// A relay component failed before it was running
    Startup(String),
    /// Every fan-in worker exited while the relay was still running
    WorkersExhausted,
}

impl Error {
    /// Whether this error is a consequence of a peer going away
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Disconnected { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Bind { endpoint, source } => {
                write!(f, "Failed to bind {}: {}", endpoint, source)
            }
            Error::Connect { endpoint, source } => {
                write!(f, "Failed to connect to {}: {}", endpoint, source)
            }
            Error::Handshake { endpoint, reason } => {
                write!(f, "Handshake with {} failed: {}", endpoint, reason)
            }
            Error::Frame(e) => write!(f, "Frame error: {}", e),
            Error::Disconnected { endpoint } => write!(f, "Disconnected from {}", endpoint),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Startup(msg) => write!(f, "Startup failed: {}", msg),
            Error::WorkersExhausted => write!(f, "All relay workers exited"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Bind { source, .. } | Error::Connect { source, .. } => Some(source),
            Error::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_endpoint() {
        let err = Error::Connect {
            endpoint: "127.0.0.1:5555".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("127.0.0.1:5555"));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(Error::Disconnected {
            endpoint: "x".into()
        }
        .is_disconnect());
        assert!(Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_disconnect());
        assert!(!Error::Config("bad".into()).is_disconnect());
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = Error::Bind {
            endpoint: "0.0.0.0:5560".into(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.source().is_some());
        assert!(Error::WorkersExhausted.source().is_none());
    }
}
