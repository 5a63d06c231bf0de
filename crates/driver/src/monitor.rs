//! Interrupt monitor
//!
//! Keeps one interrupt-in request perpetually outstanding. The
//! completion handler runs on the link's completion context and is
//! limited to an atomic store, the change signal and the rearm decision.
//! Any failure parks the request: the cached switch value freezes until
//! the context goes away, which is deliberate — a dead reporting channel
//! is not fatal to the bulk side.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};
use transport::{InterruptHandler, SubmitAction, TransferStatus};

use crate::context::DeviceContext;
use crate::error::DriverError;

/// The board reports the whole bank as a single byte.
const SWITCH_REPORT_LEN: usize = 1;

/// Arm the perpetual interrupt read. Called once from attach; failure
/// aborts the attach.
pub(crate) fn arm(ctx: &Arc<DeviceContext>) -> Result<(), DriverError> {
    let weak = Arc::downgrade(ctx);
    let handler: InterruptHandler = Box::new(move |status, payload| on_complete(&weak, status, payload));

    let request = ctx
        .link
        .interrupt_in(ctx.profile.int_in, SWITCH_REPORT_LEN, handler);
    // Registered before submission so a failed submit unwinds through
    // the ordinary context teardown, like every other attach failure.
    *ctx.monitor.lock().unwrap() = Some(Arc::clone(&request));
    request.submit().map_err(DriverError::Submission)?;
    debug!("interrupt monitor armed");
    Ok(())
}

/// Cancel the outstanding request, waiting for an in-flight completion
/// to finish. Safe to call more than once.
pub(crate) fn cancel(ctx: &DeviceContext) {
    let request = ctx.monitor.lock().unwrap().take();
    if let Some(request) = request {
        request.kill();
        debug!("interrupt monitor cancelled");
    }
}

/// Completion handler. Must not block and must not touch the teardown
/// mutex: it holds only a weak context reference so a parked request can
/// never keep a dead context alive.
fn on_complete(ctx: &Weak<DeviceContext>, status: TransferStatus, payload: &[u8]) -> SubmitAction {
    let Some(ctx) = ctx.upgrade() else {
        return SubmitAction::Park;
    };
    match status {
        TransferStatus::Completed => {
            if let Some(&byte) = payload.first() {
                ctx.switches.store(byte, Ordering::Relaxed);
                ctx.event.signal();
            }
            SubmitAction::Rearm
        }
        status => {
            // Covers both a failed completion and a failed rearm; either
            // way the channel goes dormant with the last value cached.
            warn!(%status, "interrupt channel stopped");
            SubmitAction::Park
        }
    }
}
