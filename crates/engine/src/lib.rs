//! WinDriver ioctl emulation engine
//!
//! Answers the control requests a WinDriver client issues against its
//! device node, using the host's parallel-port driver and libusb instead of
//! the proprietary kernel module.
//!
//! Layers, from the outside in:
//! - [`router`]: decides which intercepted calls belong to the emulated
//!   device and serves the virtual `/proc` files
//! - [`dispatcher`]: validates envelopes and runs one request
//! - [`session`]: the hardware context shared by all requests
//! - [`parport`] and [`usb`]: the two halves of the emulated card
//!
//! Client memory is reached only through [`memory::UserMemory`], so the
//! whole stack runs against [`memory::SparseMemory`] and the doubles in
//! [`test_utils`] without hardware.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interrupt;
pub mod memory;
pub mod parport;
pub mod procfs;
pub mod router;
pub mod session;
pub mod test_utils;
pub mod usb;

pub use config::ShimConfig;
pub use dispatcher::{Dispatcher, Reply};
pub use error::{EngineError, Result};
pub use memory::{ProcessMemory, SparseMemory, UserMemory};
pub use router::{LibcPassthrough, Passthrough, Router, RouterOptions};
pub use session::{Session, SessionOptions};
