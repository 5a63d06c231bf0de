//! Transport error types

use thiserror::Error;

/// Transport-level errors
///
/// One variant per libusb condition the driver cares about; everything
/// else collapses into `Other` with the original message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Device was disconnected
    #[error("no device")]
    NoDevice,

    /// Device or endpoint not found
    #[error("not found")]
    NotFound,

    /// Resource already in use
    #[error("busy")]
    Busy,

    /// Transfer timed out
    #[error("timed out")]
    Timeout,

    /// Endpoint stalled
    #[error("pipe error")]
    Pipe,

    /// Device returned more data than requested
    #[error("overflow")]
    Overflow,

    /// Access denied (permissions)
    #[error("access denied")]
    Access,

    /// Allocation failure in the transport
    #[error("out of memory")]
    NoMem,

    /// I/O error
    #[error("i/o error")]
    Io,

    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}
