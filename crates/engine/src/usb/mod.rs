//! USB subsystem
//!
//! The USB side of the emulated card:
//! - bus enumeration into the [`common::UsbBus`] tree
//! - matching registered tables against that tree
//! - flattening a device's descriptors into the device-data buffer
//! - control and bulk transfer execution
//!
//! Hardware access goes through [`UsbBackend`] and [`UsbHandle`]; the
//! rusb implementation lives in [`rusb_backend`].

pub mod matcher;
pub mod rusb_backend;
pub mod serializer;
pub mod transfers;

pub use matcher::{device_matches, find_match};
pub use rusb_backend::{RusbBackend, RusbHandle};
pub use serializer::{serialize, serialize_into, serialized_size};
pub use transfers::{UsbRequest, execute};

use common::{UsbBus, UsbDevice};
use std::time::Duration;

/// Enumerates buses and opens devices
pub trait UsbBackend: Send {
    /// Snapshot every bus and device currently attached
    fn enumerate(&mut self) -> rusb::Result<Vec<UsbBus>>;

    /// Open a previously enumerated device
    fn open(&mut self, device: &UsbDevice) -> rusb::Result<Box<dyn UsbHandle>>;
}

/// An open device
pub trait UsbHandle: Send {
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    #[allow(clippy::too_many_arguments)]
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
    fn write_bulk(&mut self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;
}
