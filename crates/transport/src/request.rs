//! Asynchronous request primitive
//!
//! The seam between the driver core and the USB plumbing. A link hands
//! out requests; completions are delivered to handlers on the link's
//! completion context. Handlers must not block: the interrupt handler in
//! particular runs on the link's polling thread and anything it does adds
//! latency to every subsequent report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::EndpointDescriptor;
use crate::error::TransportError;

/// Completion status of an asynchronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer finished successfully
    Completed,
    /// Request was unlinked by an explicit cancel
    Cancelled,
    /// Link is shutting down
    Shutdown,
    /// Device is gone
    NoDevice,
    /// Endpoint stalled
    Stall,
    /// Any other transport failure
    Error,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Shutdown => "shutdown",
            TransferStatus::NoDevice => "no device",
            TransferStatus::Stall => "stall",
            TransferStatus::Error => "error",
        };
        f.write_str(name)
    }
}

impl From<TransportError> for TransferStatus {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoDevice | TransportError::NotFound => TransferStatus::NoDevice,
            TransportError::Pipe => TransferStatus::Stall,
            _ => TransferStatus::Error,
        }
    }
}

/// What an interrupt completion handler wants done with its request.
///
/// `Rearm` queues the same request again immediately, which is how a
/// perpetual interrupt read stays outstanding without the handler ever
/// blocking. If the internal rearm fails, the handler is invoked once
/// more with the mapped failure status and an empty payload so it can
/// log and park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    /// Resubmit the request immediately
    Rearm,
    /// Leave the request dormant
    Park,
}

/// Interrupt completion handler.
///
/// Called with the completion status and the payload bytes (empty on
/// failure). Runs on the link's completion context; must not block.
pub type InterruptHandler = Box<dyn FnMut(TransferStatus, &[u8]) -> SubmitAction + Send>;

/// Write completion handler.
///
/// Called exactly once, after the transfer buffer has served its purpose.
/// The link releases the buffer on completion regardless of status.
pub type WriteCompletion = Box<dyn FnOnce(TransferStatus) + Send>;

/// An asynchronous transfer that can be armed and killed.
pub trait AsyncRequest: Send + Sync {
    /// Queue the transfer. Fails if the request was killed, the device is
    /// gone, or the request is already in flight.
    fn submit(&self) -> Result<(), TransportError>;

    /// Cancel the request and wait until no completion handler is
    /// running. After `kill` returns, the handler will never be invoked
    /// again and `submit` always fails.
    fn kill(&self);
}

/// Connection to one physical device.
///
/// The object is the transport handle: dropping the last clone releases
/// the underlying device connection.
pub trait DeviceLink: Send + Sync {
    /// Endpoint layout snapshot taken when the link was opened.
    fn endpoints(&self) -> Vec<EndpointDescriptor>;

    /// Allocate the perpetual interrupt-in request for `endpoint`.
    ///
    /// The request is created parked; nothing happens until the first
    /// `submit`. Completions deliver at most `len` payload bytes.
    fn interrupt_in(
        &self,
        endpoint: u8,
        len: usize,
        handler: InterruptHandler,
    ) -> Arc<dyn AsyncRequest>;

    /// Fire-and-forget bulk write.
    ///
    /// On success the transfer is in flight and `on_complete` will run
    /// exactly once, after which the buffer is released. On failure the
    /// buffer and the completion are released immediately and
    /// `on_complete` never runs.
    fn submit_bulk_out(
        &self,
        endpoint: u8,
        data: Vec<u8>,
        on_complete: WriteCompletion,
    ) -> Result<(), TransportError>;

    /// Blocking bulk read with a fixed timeout.
    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Clear a halted endpoint.
    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_transport_error() {
        assert_eq!(
            TransferStatus::from(TransportError::NoDevice),
            TransferStatus::NoDevice
        );
        assert_eq!(
            TransferStatus::from(TransportError::Pipe),
            TransferStatus::Stall
        );
        assert_eq!(
            TransferStatus::from(TransportError::Io),
            TransferStatus::Error
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TransferStatus::Completed.to_string(), "completed");
        assert_eq!(TransferStatus::NoDevice.to_string(), "no device");
    }
}
