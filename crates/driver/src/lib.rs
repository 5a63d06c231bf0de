//! dipboard driver core
//!
//! Lifecycle and I/O machinery for a USB peripheral board with a
//! DIP-switch bank (reported over an interrupt endpoint) and a
//! bidirectional bulk channel. The crate owns the hard part of the
//! driver: reference-counted device state shared between concurrent open
//! handles, an interrupt completion context and a disconnect that can
//! race with all of them.
//!
//! The transport underneath is abstract — see the `transport` crate for
//! the rusb-backed link and the loopback mock the tests run against.
//!
//! ```no_run
//! use std::sync::Arc;
//! use driver::AccessMode;
//!
//! let link = Arc::new(transport::UsbLink::open(0x0547, 0x1002)?);
//! let device = driver::attach(link)?;
//!
//! let handle = device.open(AccessMode::ReadWrite)?;
//! handle.write(&[0x01, 0x02, 0x03])?;
//! let echoed = handle.read(64)?;
//! println!("switches: {}", device.switch_string());
//! # Ok::<(), driver::DriverError>(())
//! ```

mod bulk;
mod context;
mod gate;
mod lifecycle;
mod monitor;

pub mod error;

pub use context::format_switches;
pub use error::{DriverError, Result};
pub use gate::AccessMode;
pub use lifecycle::{Device, OpenHandle, attach};
