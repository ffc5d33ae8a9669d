//! Error types for the launcher.

use thiserror::Error;

/// Top-level launcher error.
#[derive(Error, Debug)]
pub enum Error {
    /// Binary acquisition error
    #[error("Acquire error: {0}")]
    Acquire(#[from] crate::binary::fetch::AcquireError),

    /// Tunnel connect error
    #[error("Connect error: {0}")]
    Connect(#[from] crate::tunnel::supervisor::ConnectError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for launcher operations.
pub type Result<T> = std::result::Result<T, Error>;
