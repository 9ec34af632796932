//! Error types for the SMTP engine.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a connection or stop the listener.
///
/// Errors a client can recover from are answered with a reply instead and
/// never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client did not send or accept data in time.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The client closed the connection mid-exchange.
    #[error("Connection closed by peer")]
    ConnectionClosed,
}

impl Error {
    /// Returns true if the peer went away rather than misbehaving.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}
