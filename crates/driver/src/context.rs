//! Shared device context
//!
//! One `DeviceContext` exists per physical attachment, shared through an
//! `Arc`: the attach event, every open handle and nothing else hold
//! strong references, so the last of them to drop runs teardown exactly
//! once. The live flag under its mutex is the only field that says
//! whether the physical device is still bound; everything else is either
//! single-writer (the cached switch byte belongs to the interrupt
//! completion) or guarded by the access gate.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;
use transport::{AsyncRequest, DeviceLink, EndpointDescriptor};

use crate::error::DriverError;
use crate::gate::AccessGate;

/// Bulk channel endpoints and their negotiated transfer sizes.
#[derive(Debug, Clone)]
pub(crate) struct BulkPair {
    pub(crate) in_ep: u8,
    pub(crate) in_size: usize,
    pub(crate) out_ep: u8,
}

/// Endpoint layout selected at attach.
#[derive(Debug, Clone)]
pub(crate) struct EndpointProfile {
    pub(crate) int_in: u8,
    /// `None` on legacy switch-only boards.
    pub(crate) bulk: Option<BulkPair>,
}

impl EndpointProfile {
    /// Validate the reported endpoint layout.
    ///
    /// Exactly one interrupt-in endpoint is required. Bulk endpoints must
    /// come as a complete in/out pair; a board without any attaches in
    /// the switch-only profile, a board with half a pair does not attach.
    pub(crate) fn discover(endpoints: &[EndpointDescriptor]) -> Result<Self, DriverError> {
        let int_in: Vec<_> = endpoints.iter().filter(|e| e.is_interrupt_in()).collect();
        let bulk_in: Vec<_> = endpoints.iter().filter(|e| e.is_bulk_in()).collect();
        let bulk_out: Vec<_> = endpoints.iter().filter(|e| e.is_bulk_out()).collect();

        let [int_in] = int_in.as_slice() else {
            return Err(DriverError::NoSuchDevice);
        };

        let bulk = match (bulk_in.as_slice(), bulk_out.as_slice()) {
            ([input], [output]) => Some(BulkPair {
                in_ep: input.address,
                in_size: input.max_packet_size as usize,
                out_ep: output.address,
            }),
            ([], []) => None,
            _ => return Err(DriverError::NoSuchDevice),
        };

        Ok(Self {
            int_in: int_in.address,
            bulk,
        })
    }
}

/// Switch-change notification: a generation counter under a mutex plus a
/// condvar. Signalling is cheap enough for the interrupt completion
/// context; waiters never miss an update that happens between reading
/// the counter and blocking.
pub(crate) struct SwitchEvent {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl SwitchEvent {
    pub(crate) fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn signal(&self) {
        *self.generation.lock().unwrap() += 1;
        self.cond.notify_all();
    }

    /// Block until the next signal or `timeout`. Returns whether a
    /// signal arrived.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock().unwrap();
        let seen = *generation;
        while *generation == seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _timed_out) = self.cond.wait_timeout(generation, deadline - now).unwrap();
            generation = next;
        }
        true
    }
}

/// Shared record for one physical device instance.
pub(crate) struct DeviceContext {
    /// Transport handle; the clone held here keeps the connection open
    /// until teardown.
    pub(crate) link: Arc<dyn DeviceLink>,
    /// Teardown mutex over the interface association. `false` once
    /// disconnect has run. Held for every read or write of the flag.
    pub(crate) live: Mutex<bool>,
    /// Last-observed switch byte, MSB = leftmost switch. Written only by
    /// the interrupt completion.
    pub(crate) switches: AtomicU8,
    /// Unacknowledged bytes in flight on the bulk-out channel.
    pub(crate) pending: AtomicUsize,
    pub(crate) event: SwitchEvent,
    pub(crate) gate: AccessGate,
    /// The armed interrupt request; `None` once cancelled.
    pub(crate) monitor: Mutex<Option<Arc<dyn AsyncRequest>>>,
    pub(crate) profile: EndpointProfile,
}

impl DeviceContext {
    pub(crate) fn is_live(&self) -> bool {
        *self.live.lock().unwrap()
    }

    pub(crate) fn switch_byte(&self) -> u8 {
        self.switches.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_data(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Write-side accounting: reads subtract what they consumed, never
    /// below zero.
    pub(crate) fn consume_pending(&self, n: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                Some(p.saturating_sub(n))
            });
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // Normally disconnect has already cancelled the request; this
        // covers the attach-unwind path where it is still registered.
        if let Some(request) = self.monitor.get_mut().unwrap().take() {
            request.kill();
        }
        debug!("device context torn down");
    }
}

/// Render a switch byte the way the board labels it: eight ASCII
/// `0`/`1`s, leftmost switch (MSB) first.
pub fn format_switches(byte: u8) -> String {
    (0..8)
        .rev()
        .map(|bit| if byte & (1 << bit) != 0 { '1' } else { '0' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use transport::TransferKind;

    fn endpoint(address: u8, kind: TransferKind) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            kind,
            max_packet_size: 64,
            interval: 1,
        }
    }

    #[test]
    fn test_format_switches() {
        assert_eq!(format_switches(0b1011_0000), "10110000");
        assert_eq!(format_switches(0x00), "00000000");
        assert_eq!(format_switches(0xff), "11111111");
        assert_eq!(format_switches(0x01), "00000001");
    }

    #[test]
    fn test_discover_full_board() {
        let profile = EndpointProfile::discover(&[
            endpoint(0x81, TransferKind::Interrupt),
            endpoint(0x06, TransferKind::Bulk),
            endpoint(0x88, TransferKind::Bulk),
        ])
        .unwrap();
        assert_eq!(profile.int_in, 0x81);
        let bulk = profile.bulk.unwrap();
        assert_eq!(bulk.in_ep, 0x88);
        assert_eq!(bulk.out_ep, 0x06);
        assert_eq!(bulk.in_size, 64);
    }

    #[test]
    fn test_discover_switch_only_board() {
        let profile =
            EndpointProfile::discover(&[endpoint(0x81, TransferKind::Interrupt)]).unwrap();
        assert!(profile.bulk.is_none());
    }

    #[test]
    fn test_discover_rejects_missing_interrupt() {
        let err = EndpointProfile::discover(&[
            endpoint(0x06, TransferKind::Bulk),
            endpoint(0x88, TransferKind::Bulk),
        ])
        .unwrap_err();
        assert_eq!(err, DriverError::NoSuchDevice);
    }

    #[test]
    fn test_discover_rejects_half_a_bulk_pair() {
        let err = EndpointProfile::discover(&[
            endpoint(0x81, TransferKind::Interrupt),
            endpoint(0x88, TransferKind::Bulk),
        ])
        .unwrap_err();
        assert_eq!(err, DriverError::NoSuchDevice);
    }

    #[test]
    fn test_switch_event_signal_wakes_waiter() {
        let event = Arc::new(SwitchEvent::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        event.signal();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_switch_event_times_out() {
        let event = SwitchEvent::new();
        assert!(!event.wait(Duration::from_millis(10)));
    }
}
