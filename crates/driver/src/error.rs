//! Driver error types

use thiserror::Error;
use transport::TransportError;

/// Errors surfaced to device consumers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Device is absent or has been disconnected
    #[error("no such device")]
    NoSuchDevice,

    /// Allocation failure in the transport
    #[error("out of memory")]
    OutOfMemory,

    /// Requested channel exclusivity is already held
    #[error("device busy")]
    Busy,

    /// Bulk transfer timed out
    #[error("transfer timed out")]
    Timeout,

    /// Operation not permitted by the handle's access mode
    #[error("access mode does not permit this operation")]
    InvalidAccess,

    /// Bulk transfer failed in the transport
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Asynchronous request rejected at submission
    #[error("submission rejected: {0}")]
    Submission(TransportError),
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;

impl From<TransportError> for DriverError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoDevice => DriverError::NoSuchDevice,
            TransportError::NoMem => DriverError::OutOfMemory,
            TransportError::Timeout => DriverError::Timeout,
            TransportError::Busy => DriverError::Busy,
            other => DriverError::Transport(other),
        }
    }
}
