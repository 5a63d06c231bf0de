//! rusb-backed device link
//!
//! Opens the board by VID/PID, detaches any kernel driver, claims the
//! interface and snapshots the endpoint layout. The asynchronous request
//! primitives are built on dedicated threads: the interrupt request polls
//! `read_interrupt` with a short timeout under a running flag, and each
//! bulk-out submission hands its buffer to a worker that performs the
//! blocking write and then fires the completion.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rusb::{Context, DeviceHandle, UsbContext};
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointDescriptor, TransferKind};
use crate::error::TransportError;
use crate::request::{
    AsyncRequest, DeviceLink, InterruptHandler, SubmitAction, TransferStatus, WriteCompletion,
};

/// Poll granularity for the interrupt worker. Short enough that `kill`
/// never waits noticeably, long enough to stay off the CPU.
const INTERRUPT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Timeout for a single bulk-out transfer.
const BULK_OUT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `Drop` waits for in-flight writes before giving up.
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(6);

/// Identity of a board found during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Enumerate connected boards matching `vid`/`pid`.
pub fn list_boards(vid: u16, pid: u16) -> Result<Vec<BoardInfo>, TransportError> {
    let context = Context::new().map_err(map_rusb_error)?;
    let mut boards = Vec::new();
    for device in context.devices().map_err(map_rusb_error)?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() == vid && desc.product_id() == pid {
            boards.push(BoardInfo {
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: vid,
                product_id: pid,
            });
        }
    }
    Ok(boards)
}

struct WriteTracker {
    in_flight: Mutex<usize>,
    drained: Condvar,
}

/// Physical device connection on rusb.
pub struct UsbLink {
    handle: Arc<DeviceHandle<Context>>,
    endpoints: Vec<EndpointDescriptor>,
    interface: u8,
    detached_kernel_driver: bool,
    writes: Arc<WriteTracker>,
}

impl UsbLink {
    /// Open the first board matching `vid`/`pid` on interface 0.
    pub fn open(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let context = Context::new().map_err(map_rusb_error)?;
        let handle = context
            .open_device_with_vid_pid(vid, pid)
            .ok_or(TransportError::NotFound)?;

        let interface = 0u8;
        let mut detached = false;
        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(interface, "detaching kernel driver");
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => detached = true,
                    Err(e) => warn!(interface, error = %e, "failed to detach kernel driver"),
                }
            }
            Ok(false) => {}
            Err(e) => debug!(interface, error = %e, "could not query kernel driver state"),
        }

        handle.claim_interface(interface).map_err(map_rusb_error)?;

        let endpoints = snapshot_endpoints(&handle, interface)?;
        info!("board {vid:04x}:{pid:04x} opened");

        Ok(Self {
            handle: Arc::new(handle),
            endpoints,
            interface,
            detached_kernel_driver: detached,
            writes: Arc::new(WriteTracker {
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
            }),
        })
    }
}

fn snapshot_endpoints(
    handle: &DeviceHandle<Context>,
    interface: u8,
) -> Result<Vec<EndpointDescriptor>, TransportError> {
    let config = handle
        .device()
        .active_config_descriptor()
        .map_err(map_rusb_error)?;

    let mut endpoints = Vec::new();
    for iface in config.interfaces() {
        if iface.number() != interface {
            continue;
        }
        for desc in iface.descriptors() {
            for ep in desc.endpoint_descriptors() {
                endpoints.push(EndpointDescriptor {
                    address: ep.address(),
                    kind: map_transfer_type(ep.transfer_type()),
                    max_packet_size: ep.max_packet_size(),
                    interval: ep.interval(),
                });
            }
        }
    }
    debug!(count = endpoints.len(), "endpoint layout cached");
    Ok(endpoints)
}

fn map_transfer_type(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
    }
}

/// Map rusb errors onto the transport taxonomy.
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::NoMem => TransportError::NoMem,
        _ => TransportError::Other(err.to_string()),
    }
}

impl DeviceLink for UsbLink {
    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.endpoints.clone()
    }

    fn interrupt_in(
        &self,
        endpoint: u8,
        len: usize,
        handler: InterruptHandler,
    ) -> Arc<dyn AsyncRequest> {
        let shared = Arc::new(IntShared {
            flags: Mutex::new(IntFlags::default()),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = Arc::clone(&self.handle);
        let worker = thread::Builder::new()
            .name("dipboard-interrupt".to_string())
            .spawn(move || interrupt_worker(handle, endpoint, len, handler, worker_shared))
            .expect("failed to spawn interrupt worker thread");

        Arc::new(UsbInterruptRequest {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn submit_bulk_out(
        &self,
        endpoint: u8,
        data: Vec<u8>,
        on_complete: WriteCompletion,
    ) -> Result<(), TransportError> {
        *self.writes.in_flight.lock().unwrap() += 1;

        let handle = Arc::clone(&self.handle);
        let writes = Arc::clone(&self.writes);
        let spawned = thread::Builder::new()
            .name("dipboard-bulk-out".to_string())
            .spawn(move || {
                let status = match handle.write_bulk(endpoint, &data, BULK_OUT_TIMEOUT) {
                    Ok(_) => TransferStatus::Completed,
                    Err(e) => TransferStatus::from(map_rusb_error(e)),
                };
                on_complete(status);
                drop(data);
                let mut in_flight = writes.in_flight.lock().unwrap();
                *in_flight -= 1;
                if *in_flight == 0 {
                    writes.drained.notify_all();
                }
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(e) => {
                // The closure was never run: buffer and completion were
                // dropped with it.
                *self.writes.in_flight.lock().unwrap() -= 1;
                Err(TransportError::Other(format!(
                    "bulk-out worker spawn failed: {e}"
                )))
            }
        }
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        self.handle.clear_halt(endpoint).map_err(map_rusb_error)
    }
}

impl Drop for UsbLink {
    fn drop(&mut self) {
        // Let in-flight writes retire so their buffers are released
        // before the interface goes away.
        let deadline = Instant::now() + WRITE_DRAIN_TIMEOUT;
        let mut in_flight = self.writes.in_flight.lock().unwrap();
        while *in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(in_flight = *in_flight, "closing link with writes still in flight");
                break;
            }
            let (next, _timed_out) = self
                .writes
                .drained
                .wait_timeout(in_flight, deadline - now)
                .unwrap();
            in_flight = next;
        }
        drop(in_flight);

        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!(interface = self.interface, error = %e, "release_interface failed");
        }
        if self.detached_kernel_driver {
            if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                debug!(interface = self.interface, error = %e, "could not reattach kernel driver");
            }
        }
        debug!("link closed");
    }
}

#[derive(Default)]
struct IntFlags {
    armed: bool,
    killed: bool,
}

struct IntShared {
    flags: Mutex<IntFlags>,
    wake: Condvar,
}

struct UsbInterruptRequest {
    shared: Arc<IntShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AsyncRequest for UsbInterruptRequest {
    fn submit(&self) -> Result<(), TransportError> {
        let mut flags = self.shared.flags.lock().unwrap();
        if flags.killed {
            return Err(TransportError::NoDevice);
        }
        if flags.armed {
            return Err(TransportError::Busy);
        }
        flags.armed = true;
        self.shared.wake.notify_all();
        Ok(())
    }

    fn kill(&self) {
        {
            let mut flags = self.shared.flags.lock().unwrap();
            flags.killed = true;
            flags.armed = false;
            self.shared.wake.notify_all();
        }
        // Joining the worker waits out an in-flight completion handler.
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn interrupt_worker(
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    len: usize,
    mut handler: InterruptHandler,
    shared: Arc<IntShared>,
) {
    let mut buf = vec![0u8; len.max(1)];
    loop {
        {
            let mut flags = shared.flags.lock().unwrap();
            while !flags.armed && !flags.killed {
                flags = shared.wake.wait(flags).unwrap();
            }
            if flags.killed {
                return;
            }
        }

        match handle.read_interrupt(endpoint, &mut buf, INTERRUPT_POLL_TIMEOUT) {
            // No report yet; the request stays armed and we poll again.
            Err(rusb::Error::Timeout) => continue,
            Ok(n) => {
                if !disarm(&shared) {
                    return;
                }
                if handler(TransferStatus::Completed, &buf[..n]) == SubmitAction::Rearm
                    && !rearm(&shared)
                {
                    return;
                }
            }
            Err(e) => {
                if !disarm(&shared) {
                    return;
                }
                let status = TransferStatus::from(map_rusb_error(e));
                if handler(status, &[]) == SubmitAction::Rearm && !rearm(&shared) {
                    return;
                }
            }
        }
    }
}

fn disarm(shared: &IntShared) -> bool {
    let mut flags = shared.flags.lock().unwrap();
    if flags.killed {
        return false;
    }
    flags.armed = false;
    true
}

fn rearm(shared: &IntShared) -> bool {
    let mut flags = shared.flags.lock().unwrap();
    if flags.killed {
        return false;
    }
    flags.armed = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransportError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), TransportError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), TransportError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::NoMem), TransportError::NoMem);
    }

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferKind::Interrupt
        );
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferKind::Bulk);
    }
}
