//! In-memory loopback link for tests
//!
//! Behaves like a board whose bulk-out pipe loops back into the bulk-in
//! pipe: everything written becomes readable. Interrupt completions are
//! driven by the test through [`MockLink::push_switches`], and
//! [`MockLink::unplug`] simulates yanking the cable — blocked readers
//! wake with `NoDevice` and every later submission is refused.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::endpoint::{EndpointDescriptor, TransferKind};
use crate::error::TransportError;
use crate::request::{
    AsyncRequest, DeviceLink, InterruptHandler, SubmitAction, TransferStatus, WriteCompletion,
};

/// Default mock endpoint layout, matching the board: interrupt IN 1,
/// bulk OUT 6, bulk IN 8.
pub const INT_IN: u8 = 0x81;
pub const BULK_OUT: u8 = 0x06;
pub const BULK_IN: u8 = 0x88;

#[derive(Default)]
struct MockState {
    unplugged: bool,
    loopback: VecDeque<u8>,
    fail_next_bulk_out: Option<TransportError>,
    fail_interrupt_submit: bool,
    write_completion_status: Option<TransferStatus>,
    clear_halt_failures: HashMap<u8, TransportError>,
    clear_halt_calls: Vec<u8>,
    writes_submitted: usize,
}

struct MockShared {
    state: Mutex<MockState>,
    data_ready: Condvar,
}

/// Loopback test link.
pub struct MockLink {
    endpoints: Vec<EndpointDescriptor>,
    shared: Arc<MockShared>,
    interrupt: Mutex<Option<Arc<MockInterrupt>>>,
}

impl MockLink {
    /// Full board: interrupt-in plus a bulk loopback pair.
    pub fn loopback() -> Self {
        Self::with_endpoints(vec![
            EndpointDescriptor {
                address: INT_IN,
                kind: TransferKind::Interrupt,
                max_packet_size: 2,
                interval: 1,
            },
            EndpointDescriptor {
                address: BULK_OUT,
                kind: TransferKind::Bulk,
                max_packet_size: 64,
                interval: 0,
            },
            EndpointDescriptor {
                address: BULK_IN,
                kind: TransferKind::Bulk,
                max_packet_size: 64,
                interval: 0,
            },
        ])
    }

    /// Legacy board with the interrupt endpoint only.
    pub fn switch_only() -> Self {
        Self::with_endpoints(vec![EndpointDescriptor {
            address: INT_IN,
            kind: TransferKind::Interrupt,
            max_packet_size: 2,
            interval: 1,
        }])
    }

    /// Arbitrary endpoint layout, for attach validation tests.
    pub fn with_endpoints(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self {
            endpoints,
            shared: Arc::new(MockShared {
                state: Mutex::new(MockState::default()),
                data_ready: Condvar::new(),
            }),
            interrupt: Mutex::new(None),
        }
    }

    /// Simulate a completion of the outstanding interrupt request with
    /// the given switch byte. Returns false if no request was armed.
    pub fn push_switches(&self, byte: u8) -> bool {
        match self.interrupt.lock().unwrap().clone() {
            Some(req) => req.complete(TransferStatus::Completed, &[byte]),
            None => false,
        }
    }

    /// Complete the outstanding interrupt request with an error status.
    pub fn fail_interrupt(&self, status: TransferStatus) -> bool {
        match self.interrupt.lock().unwrap().clone() {
            Some(req) => req.complete(status, &[]),
            None => false,
        }
    }

    /// Yank the cable: blocked reads wake with `NoDevice`, later
    /// submissions are refused, interrupt rearms fail.
    pub fn unplug(&self) {
        self.shared.state.lock().unwrap().unplugged = true;
        self.shared.data_ready.notify_all();
    }

    /// Make the next interrupt `submit` fail, for attach-unwind tests.
    pub fn fail_next_interrupt_submit(&self) {
        self.shared.state.lock().unwrap().fail_interrupt_submit = true;
    }

    /// Make the next bulk-out submission fail with `err`.
    pub fn fail_next_bulk_out(&self, err: TransportError) {
        self.shared.state.lock().unwrap().fail_next_bulk_out = Some(err);
    }

    /// Deliver the given status to the next write completion instead of
    /// `Completed`; the written bytes are discarded, not looped back.
    pub fn set_write_completion_status(&self, status: TransferStatus) {
        self.shared.state.lock().unwrap().write_completion_status = Some(status);
    }

    /// Make `clear_halt` on `endpoint` fail with `err`.
    pub fn fail_clear_halt(&self, endpoint: u8, err: TransportError) {
        self.shared
            .state
            .lock()
            .unwrap()
            .clear_halt_failures
            .insert(endpoint, err);
    }

    /// Endpoints `clear_halt` has been called on, in order.
    pub fn clear_halt_calls(&self) -> Vec<u8> {
        self.shared.state.lock().unwrap().clear_halt_calls.clone()
    }

    /// Bytes currently waiting in the loopback FIFO.
    pub fn loopback_len(&self) -> usize {
        self.shared.state.lock().unwrap().loopback.len()
    }

    /// Put bytes straight into the bulk-in FIFO, bypassing the write
    /// path — as if the board produced data of its own accord.
    pub fn seed_loopback(&self, data: &[u8]) {
        self.shared
            .state
            .lock()
            .unwrap()
            .loopback
            .extend(data.iter().copied());
        self.shared.data_ready.notify_all();
    }

    /// Number of bulk-out submissions accepted so far.
    pub fn writes_submitted(&self) -> usize {
        self.shared.state.lock().unwrap().writes_submitted
    }

    /// Whether the interrupt request has been killed.
    pub fn interrupt_killed(&self) -> bool {
        self.interrupt
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|req| req.killed.load(Ordering::SeqCst))
    }

    /// Whether an interrupt request is currently armed.
    pub fn interrupt_armed(&self) -> bool {
        self.interrupt
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|req| req.armed.load(Ordering::SeqCst))
    }
}

impl DeviceLink for MockLink {
    fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.endpoints.clone()
    }

    fn interrupt_in(
        &self,
        _endpoint: u8,
        _len: usize,
        handler: InterruptHandler,
    ) -> Arc<dyn AsyncRequest> {
        let req = Arc::new(MockInterrupt {
            shared: Arc::clone(&self.shared),
            armed: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            handler: Mutex::new(Some(handler)),
        });
        *self.interrupt.lock().unwrap() = Some(Arc::clone(&req));
        req
    }

    fn submit_bulk_out(
        &self,
        _endpoint: u8,
        data: Vec<u8>,
        on_complete: WriteCompletion,
    ) -> Result<(), TransportError> {
        let status = {
            let mut state = self.shared.state.lock().unwrap();
            if state.unplugged {
                return Err(TransportError::NoDevice);
            }
            if let Some(err) = state.fail_next_bulk_out.take() {
                return Err(err);
            }
            state.writes_submitted += 1;
            match state.write_completion_status.take() {
                Some(status) => status,
                None => {
                    state.loopback.extend(data.iter().copied());
                    TransferStatus::Completed
                }
            }
        };
        self.shared.data_ready.notify_all();
        on_complete(status);
        Ok(())
    }

    fn read_bulk(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.unplugged {
                return Err(TransportError::NoDevice);
            }
            if !state.loopback.is_empty() {
                let n = buf.len().min(state.loopback.len());
                for slot in buf[..n].iter_mut() {
                    *slot = state.loopback.pop_front().unwrap();
                }
                return Ok(n);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            let (next, _timed_out) = self
                .shared
                .data_ready
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        state.clear_halt_calls.push(endpoint);
        if state.unplugged {
            return Err(TransportError::NoDevice);
        }
        match state.clear_halt_failures.get(&endpoint) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

struct MockInterrupt {
    shared: Arc<MockShared>,
    armed: AtomicBool,
    killed: AtomicBool,
    handler: Mutex<Option<InterruptHandler>>,
}

impl MockInterrupt {
    /// Deliver one completion. The handler runs on the calling thread
    /// with the handler lock held, so `kill` blocks until delivery is
    /// done. A `Rearm` return re-arms unless the link is unplugged, in
    /// which case the failure is redelivered so the handler can park.
    fn complete(&self, status: TransferStatus, payload: &[u8]) -> bool {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return false;
        }
        let mut guard = self.handler.lock().unwrap();
        let Some(handler) = guard.as_mut() else {
            return false;
        };
        if handler(status, payload) == SubmitAction::Rearm {
            let rearm_failure = {
                let state = self.shared.state.lock().unwrap();
                state.unplugged.then_some(TransferStatus::NoDevice)
            };
            match rearm_failure {
                Some(failure) => {
                    let _ = handler(failure, &[]);
                }
                None => {
                    if !self.killed.load(Ordering::SeqCst) {
                        self.armed.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
        true
    }
}

impl AsyncRequest for MockInterrupt {
    fn submit(&self) -> Result<(), TransportError> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(TransportError::NoDevice);
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.fail_interrupt_submit {
                state.fail_interrupt_submit = false;
                return Err(TransportError::Io);
            }
            if state.unplugged {
                return Err(TransportError::NoDevice);
            }
        }
        if self.armed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Busy);
        }
        Ok(())
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
        // Taking the handler lock waits out any completion still being
        // delivered on another thread.
        let _guard = self.handler.lock().unwrap();
    }
}
