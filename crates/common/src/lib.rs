//! Common utilities for wdshim
//!
//! This crate provides functionality shared by the engine and its tools:
//! the error type, logging setup, the backend-neutral USB descriptor tree,
//! and descriptor-tree builders for tests.

pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::{hexdump, setup_logging};
pub use usb_types::{
    DeviceRef, UsbAltSetting, UsbBus, UsbConfiguration, UsbDevice, UsbInterface, device_at,
    group_by_bus,
};
