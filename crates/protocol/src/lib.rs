//! Emulated driver ABI for wdshim
//!
//! This crate describes the binary control protocol spoken by the vendor
//! driver that wdshim stands in for: the magic-tagged envelope header, the
//! request code table, the payload structure of every request, and the
//! records of the flat USB device-data buffer. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{Header, MAGIC, Opcode, Wire, WordSize};
//!
//! let word = WordSize::Eight;
//! let header = Header { magic: MAGIC, data: 0x1000, size: 136 };
//! let mut buf = vec![0u8; Header::wire_size(word)];
//! header.encode(&mut buf, word).unwrap();
//!
//! let decoded = Header::decode(&buf, word).unwrap();
//! assert!(decoded.is_valid());
//! assert_eq!(Opcode::from_request(0xc000_0910), Some(Opcode::Version));
//! ```

pub mod descriptors;
pub mod error;
pub mod layout;
pub mod opcode;
pub mod types;
pub mod version;

pub use descriptors::{
    AltSettingRecord, ConfigurationDescriptor, ConfigurationRecord, DeviceDescriptor,
    DeviceInfoRecord, EndpointDescriptor, InterfaceDescriptor, InterfaceRecord, MAX_INTERFACES,
    PipeInfo,
};
pub use error::{ProtocolError, Result};
pub use layout::{Cursor, FieldAccess, Wire, WordSize, align_up};
pub use opcode::{MAGIC, Opcode, mask_request};
pub use types::{
    CARD_ITEMS, CMD_READ_BYTE, CMD_WRITE_BYTE, CardItem, CardRegister, Event, EventHeader,
    Header, Interrupt, MatchEntry, PortTransfer, SetupPacket, UsbGetDeviceData, UsbSetInterface,
    UsbTransfer, VersionInfo,
};
pub use version::{DRIVER_VERSION, version_string};
