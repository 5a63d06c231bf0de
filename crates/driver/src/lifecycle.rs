//! Device lifecycle
//!
//! attach builds the shared context and arms the interrupt monitor; open
//! hands out handles under the access gate; disconnect marks the device
//! gone and cancels the monitor while open handles keep draining; the
//! last strong reference to drop — handle or attach event, whichever is
//! later — runs teardown.

use std::sync::atomic::{AtomicU8, AtomicUsize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use transport::{DeviceLink, TransportError};

use crate::bulk;
use crate::context::{DeviceContext, EndpointProfile, SwitchEvent, format_switches};
use crate::error::{DriverError, Result};
use crate::gate::{AccessGate, AccessMode};
use crate::monitor;

/// Bind a freshly enumerated board.
///
/// Validates the endpoint layout, builds the context and arms the
/// interrupt monitor. Any failure past construction unwinds through the
/// same reference-counted teardown that a normal detach uses.
pub fn attach(link: Arc<dyn DeviceLink>) -> Result<Device> {
    let profile = EndpointProfile::discover(&link.endpoints())?;

    let ctx = Arc::new(DeviceContext {
        link,
        live: Mutex::new(true),
        switches: AtomicU8::new(0),
        pending: AtomicUsize::new(0),
        event: SwitchEvent::new(),
        gate: AccessGate::default(),
        monitor: Mutex::new(None),
        profile,
    });

    // On error the context drops right here, killing the request if it
    // got registered and releasing the link.
    monitor::arm(&ctx)?;

    info!(
        bulk = ctx.profile.bulk.is_some(),
        "dipboard attached"
    );
    Ok(Device { ctx })
}

/// The attach-time reference to a bound board.
///
/// Owned by whatever plays the registration role — typically the
/// enumeration front-end. Open handles share the underlying context and
/// outlive the `Device` if the board disappears while they are open.
pub struct Device {
    ctx: Arc<DeviceContext>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("connected", &self.ctx.is_live())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Open a handle with the given access mode.
    ///
    /// Fails `Busy` if the requested channels are already claimed and
    /// `NoSuchDevice` after disconnect. The context reference is taken
    /// only once the claim and the endpoint resets have gone through.
    pub fn open(&self, mode: AccessMode) -> Result<OpenHandle> {
        if !self.ctx.is_live() {
            return Err(DriverError::NoSuchDevice);
        }
        self.ctx.gate.claim(mode)?;
        reset_claimed_endpoints(&self.ctx, mode);
        Ok(OpenHandle {
            ctx: Arc::clone(&self.ctx),
            mode,
        })
    }

    /// Last-observed switch byte.
    pub fn switches(&self) -> u8 {
        self.ctx.switch_byte()
    }

    /// Switch bank rendered as eight `0`/`1` characters, leftmost switch
    /// first.
    pub fn switch_string(&self) -> String {
        format_switches(self.ctx.switch_byte())
    }

    /// Unacknowledged bytes submitted on the bulk-out channel.
    pub fn pending_data(&self) -> usize {
        self.ctx.pending_data()
    }

    /// Whether the physical device is still bound.
    pub fn is_connected(&self) -> bool {
        self.ctx.is_live()
    }

    /// Whether the board has the bulk channel pair, or is a legacy
    /// switch-only variant.
    pub fn has_bulk_channel(&self) -> bool {
        self.ctx.profile.bulk.is_some()
    }

    /// Block until the switch bank changes or `timeout` elapses. Also
    /// woken by disconnect; check `is_connected` after a wake-up.
    pub fn wait_switch_change(&self, timeout: Duration) -> bool {
        self.ctx.event.wait(timeout)
    }

    /// React to the physical device going away.
    ///
    /// Marks the device gone under the teardown mutex and cancels the
    /// interrupt request, waiting for its in-flight completion. The
    /// attach-time reference goes away when the `Device` itself is
    /// dropped; buffers are not freed before then anyway — open handles
    /// may still be draining, and teardown runs only when the last of
    /// them lets go. Idempotent, and safe to race with open/read/write
    /// on other threads.
    pub fn disconnect(&self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        let was_live = {
            let mut live = self.ctx.live.lock().unwrap();
            std::mem::replace(&mut *live, false)
        };
        monitor::cancel(&self.ctx);
        if was_live {
            // Wake pollers so they observe the device is gone.
            self.ctx.event.signal();
            info!("dipboard disconnected");
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Dropping an un-disconnected device runs the same sequence;
        // shutdown is idempotent so the explicit path costs nothing.
        self.shutdown();
    }
}

/// One successful open.
///
/// Shares the device context and remembers the access mode it claimed so
/// drop can reverse exactly that claim.
pub struct OpenHandle {
    ctx: Arc<DeviceContext>,
    mode: AccessMode,
}

impl std::fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHandle")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl OpenHandle {
    /// Blocking read of up to `max_len` bytes from the bulk-in channel
    /// (or the rendered switch bank on a switch-only board).
    pub fn read(&self, max_len: usize) -> Result<Vec<u8>> {
        if !self.mode.wants_read() {
            return Err(DriverError::InvalidAccess);
        }
        bulk::read(&self.ctx, max_len)
    }

    /// Asynchronous write; returns the accepted byte count immediately.
    /// An empty slice is a successful no-op.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.mode.wants_write() {
            return Err(DriverError::InvalidAccess);
        }
        bulk::write(&self.ctx, data)
    }

    /// Last-observed switch byte.
    pub fn switches(&self) -> u8 {
        self.ctx.switch_byte()
    }

    /// Switch bank rendered as eight `0`/`1` characters.
    pub fn switch_string(&self) -> String {
        format_switches(self.ctx.switch_byte())
    }

    /// Block until the switch bank changes or `timeout` elapses.
    pub fn wait_switch_change(&self, timeout: Duration) -> bool {
        self.ctx.event.wait(timeout)
    }

    /// The access mode this handle was opened with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        self.ctx.gate.release(self.mode);
        debug!(mode = ?self.mode, "handle released");
    }
}

/// Clear-halt the bulk endpoints a fresh claim is about to use. A pipe
/// that was never halted reports `Pipe`; anything else is unexpected but
/// never blocks the open.
fn reset_claimed_endpoints(ctx: &DeviceContext, mode: AccessMode) {
    let Some(bulk) = &ctx.profile.bulk else {
        return;
    };
    let mut endpoints = Vec::new();
    if mode.wants_read() {
        endpoints.push(bulk.in_ep);
    }
    if mode.wants_write() {
        endpoints.push(bulk.out_ep);
    }
    for endpoint in endpoints {
        match ctx.link.clear_halt(endpoint) {
            Ok(()) => {}
            Err(TransportError::Pipe) => {
                debug!(endpoint, "endpoint already reset");
            }
            Err(err) => {
                warn!(endpoint, %err, "endpoint reset failed");
            }
        }
    }
}
