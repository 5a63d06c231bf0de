//! Per-device channel exclusivity
//!
//! One reader and one writer at a time across all open handles of a
//! physical device. Claims are explicit flags under a single mutex, so a
//! combined read/write claim either takes both channels or neither.

use std::sync::Mutex;

use crate::error::DriverError;

/// Access requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub(crate) fn wants_read(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub(crate) fn wants_write(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

#[derive(Debug, Default)]
struct Claims {
    reader: bool,
    writer: bool,
}

/// Exclusivity state for one device.
#[derive(Debug, Default)]
pub(crate) struct AccessGate {
    claims: Mutex<Claims>,
}

impl AccessGate {
    /// Claim the channels `mode` needs, all or nothing.
    pub(crate) fn claim(&self, mode: AccessMode) -> Result<(), DriverError> {
        let mut claims = self.claims.lock().unwrap();
        if (mode.wants_read() && claims.reader) || (mode.wants_write() && claims.writer) {
            return Err(DriverError::Busy);
        }
        if mode.wants_read() {
            claims.reader = true;
        }
        if mode.wants_write() {
            claims.writer = true;
        }
        Ok(())
    }

    /// Release exactly the channels `mode` claimed.
    pub(crate) fn release(&self, mode: AccessMode) {
        let mut claims = self.claims.lock().unwrap();
        if mode.wants_read() {
            claims.reader = false;
        }
        if mode.wants_write() {
            claims.writer = false;
        }
    }
}
