//! Error types for slappybell.

use std::io;
use thiserror::Error;

/// Result type for slappybell operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for slappybell operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response or line arrived before the deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The port has not been connected yet.
    #[error("Device port not open")]
    NotConnected,

    /// The port was closed, or the connection was lost, while waiting.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The send queue no longer accepts jobs.
    #[error("Tx queue is closed")]
    QueueClosed,

    /// Malformed line received from the device.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error means the deadline of a wait expired.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Build an equivalent error for a second waiter.
    ///
    /// A single write failure can end both the request that triggered it and
    /// the caller waiting on the send; neither `io::Error` nor
    /// `serialport::Error` implements `Clone`.
    #[must_use]
    pub fn replicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            #[cfg(feature = "native")]
            Self::Serial(e) => Self::Serial(serialport::Error::new(e.kind(), e.description.clone())),
            Self::Timeout(s) => Self::Timeout(s.clone()),
            Self::NotConnected => Self::NotConnected,
            Self::Disconnected(s) => Self::Disconnected(s.clone()),
            Self::QueueClosed => Self::QueueClosed,
            Self::Protocol(s) => Self::Protocol(s.clone()),
        }
    }
}
