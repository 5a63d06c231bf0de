//! Bulk channel transfers
//!
//! Reads block the caller for up to the fixed timeout; writes copy the
//! caller's bytes into an owned buffer and return as soon as the
//! transport accepts the request. The transfer buffer is released by the
//! link when the write completes, success or not — nothing else frees it.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{trace, warn};
use transport::{TransferStatus, WriteCompletion};

use crate::context::{DeviceContext, format_switches};
use crate::error::{DriverError, Result};

/// Fixed timeout for a blocking bulk-in transfer.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking read of up to `max_len` bytes.
pub(crate) fn read(ctx: &DeviceContext, max_len: usize) -> Result<Vec<u8>> {
    if !ctx.is_live() {
        return Err(DriverError::NoSuchDevice);
    }

    let Some(bulk) = &ctx.profile.bulk else {
        // Switch-only board: the readable payload is the rendered bank.
        let rendered = format_switches(ctx.switch_byte());
        return Ok(rendered.into_bytes().into_iter().take(max_len).collect());
    };

    let len = bulk.in_size.min(max_len);
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];
    let n = ctx.link.read_bulk(bulk.in_ep, &mut buf, READ_TIMEOUT)?;
    buf.truncate(n);
    ctx.consume_pending(n);
    trace!(bytes = n, "bulk read");
    Ok(buf)
}

/// Asynchronous write of the caller's bytes. Returns the accepted byte
/// count without waiting for the hardware.
pub(crate) fn write(ctx: &DeviceContext, data: &[u8]) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let Some(bulk) = &ctx.profile.bulk else {
        return Err(DriverError::NoSuchDevice);
    };

    // The live flag is checked and the request submitted under the
    // teardown mutex so no new request can slip in behind a disconnect.
    let live = ctx.live.lock().unwrap();
    if !*live {
        return Err(DriverError::NoSuchDevice);
    }

    let buf = data.to_vec();
    ctx.link
        .submit_bulk_out(bulk.out_ep, buf, retire_write())
        .map_err(DriverError::Submission)?;
    drop(live);

    ctx.pending.fetch_add(data.len(), Ordering::Relaxed);
    trace!(bytes = data.len(), "bulk write submitted");
    Ok(data.len())
}

/// Write completion: the link has already released the buffer by the
/// time this returns. A request unlinked during teardown is expected;
/// anything else is worth reporting.
fn retire_write() -> WriteCompletion {
    Box::new(|status| match status {
        TransferStatus::Completed
        | TransferStatus::Cancelled
        | TransferStatus::Shutdown
        | TransferStatus::NoDevice => {
            trace!(%status, "bulk-out request retired");
        }
        status => warn!(%status, "bulk-out completed with unexpected status"),
    })
}
