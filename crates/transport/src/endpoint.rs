//! Endpoint descriptor model
//!
//! Plain-data snapshot of the endpoint layout a link reports at attach
//! time. The driver core uses this to validate the board profile and to
//! learn negotiated transfer sizes; it never re-reads descriptors after
//! attach.

/// Transfer direction, taken from bit 7 of the endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// USB transfer type of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Interrupt,
    Bulk,
    Isochronous,
}

/// Cached endpoint descriptor
///
/// Captured once when the link is opened, mirroring what the device
/// reported during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address, direction bit included (e.g. 0x81 for IN 1)
    pub address: u8,
    /// Transfer type
    pub kind: TransferKind,
    /// Negotiated maximum packet size in bytes
    pub max_packet_size: u16,
    /// Polling interval (interrupt endpoints only, frames)
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Direction encoded in the address.
    pub fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Interrupt endpoint, device-to-host.
    pub fn is_interrupt_in(&self) -> bool {
        self.kind == TransferKind::Interrupt && self.direction() == Direction::In
    }

    /// Bulk endpoint, device-to-host.
    pub fn is_bulk_in(&self) -> bool {
        self.kind == TransferKind::Bulk && self.direction() == Direction::In
    }

    /// Bulk endpoint, host-to-device.
    pub fn is_bulk_out(&self) -> bool {
        self.kind == TransferKind::Bulk && self.direction() == Direction::Out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: u8, kind: TransferKind) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            kind,
            max_packet_size: 64,
            interval: 1,
        }
    }

    #[test]
    fn test_direction_from_address() {
        assert_eq!(endpoint(0x81, TransferKind::Interrupt).direction(), Direction::In);
        assert_eq!(endpoint(0x06, TransferKind::Bulk).direction(), Direction::Out);
    }

    #[test]
    fn test_classification() {
        assert!(endpoint(0x81, TransferKind::Interrupt).is_interrupt_in());
        assert!(!endpoint(0x01, TransferKind::Interrupt).is_interrupt_in());

        assert!(endpoint(0x88, TransferKind::Bulk).is_bulk_in());
        assert!(!endpoint(0x88, TransferKind::Bulk).is_bulk_out());

        assert!(endpoint(0x06, TransferKind::Bulk).is_bulk_out());
        assert!(!endpoint(0x06, TransferKind::Interrupt).is_bulk_out());
    }
}
