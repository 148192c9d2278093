//! Custom error types for the crate.
//!
//! `SlsError` consolidates the failure modes of the protocol stack:
//!
//! - **`ConnectionClosed`**: the peer closed the socket in the middle of a
//!   read or write. Never retried silently; `Detector::stop_acquisition`
//!   treats it as best-effort success (the detector is already stopped).
//! - **`Protocol`**: a malformed or undersized reply (unknown enum value,
//!   truncated payload). Fatal to the current exchange.
//! - **`Detector`**: an explicit FAIL reply; carries the server's error
//!   message verbatim.
//! - **`Config`** / **`Io`**: wrapped via `#[from]` so `?` works at every
//!   layer.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SlsResult<T> = std::result::Result<T, SlsError>;

#[derive(Error, Debug)]
pub enum SlsError {
    #[error("connection closed: peer closed the socket mid-exchange")]
    ConnectionClosed,

    #[error("protocol fault: {0}")]
    Protocol(String),

    #[error("detector error: {0}")]
    Detector(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
