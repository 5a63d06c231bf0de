//! Transport layer for the dipboard driver
//!
//! This crate defines the asynchronous request/completion primitive the
//! driver core is written against, plus the two implementations of it:
//! a `rusb`-backed link for real hardware and an in-memory loopback link
//! for tests.
//!
//! The driver core never touches libusb directly; everything goes through
//! the [`DeviceLink`] and [`AsyncRequest`] traits so the lifecycle and
//! synchronization machinery can be exercised without a board plugged in.

pub mod endpoint;
pub mod error;
pub mod mock;
pub mod request;
pub mod usb;

pub use endpoint::{Direction, EndpointDescriptor, TransferKind};
pub use error::TransportError;
pub use mock::MockLink;
pub use request::{
    AsyncRequest, DeviceLink, InterruptHandler, SubmitAction, TransferStatus, WriteCompletion,
};
pub use usb::{BoardInfo, UsbLink, list_boards};
