//! USB descriptors and the flat device-data records
//!
//! The descriptor structs carry the standard USB fields. The `*Record`
//! structs are the nodes of the flat buffer returned by USB_GET_DEVICE_DATA;
//! their link fields hold byte offsets from the start of that buffer.

use crate::error::Result;
use crate::layout::{FieldAccess, Wire};

/// Number of active-interface slots in the device record
pub const MAX_INTERFACES: usize = 30;

/// Bit set in an endpoint address for device-to-host endpoints
pub const ENDPOINT_DIR_IN: u8 = 0x80;
/// Transfer type bits of an endpoint's attributes
pub const ENDPOINT_TYPE_MASK: u8 = 0x03;

/// Pipe transfer types
pub const PIPE_TYPE_CONTROL: u64 = 0;
pub const PIPE_TYPE_ISOCHRONOUS: u64 = 1;
pub const PIPE_TYPE_BULK: u64 = 2;
pub const PIPE_TYPE_INTERRUPT: u64 = 3;

/// Pipe directions
pub const PIPE_DIR_IN: u64 = 1;
pub const PIPE_DIR_OUT: u64 = 2;
pub const PIPE_DIR_IN_OUT: u64 = 3;

/// Effective packet size of a raw `wMaxPacketSize`, including high-bandwidth multipliers
pub fn max_packet_size(raw: u16) -> u64 {
    let raw = u64::from(raw);
    (raw & 0x7ff) * (1 + ((raw & 0x1800) >> 11))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LENGTH: u8 = 18;
    pub const TYPE: u8 = 0x01;
}

impl Wire for DeviceDescriptor {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.u8(&mut self.length)?;
        a.u8(&mut self.descriptor_type)?;
        a.u16(&mut self.usb_version)?;
        a.u8(&mut self.device_class)?;
        a.u8(&mut self.device_subclass)?;
        a.u8(&mut self.device_protocol)?;
        a.u8(&mut self.max_packet_size0)?;
        a.u16(&mut self.vendor_id)?;
        a.u16(&mut self.product_id)?;
        a.u16(&mut self.device_version)?;
        a.u8(&mut self.manufacturer_index)?;
        a.u8(&mut self.product_index)?;
        a.u8(&mut self.serial_number_index)?;
        a.u8(&mut self.num_configurations)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    /// In 2 mA units
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LENGTH: u8 = 9;
    pub const TYPE: u8 = 0x02;
}

impl Wire for ConfigurationDescriptor {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.u8(&mut self.length)?;
        a.u8(&mut self.descriptor_type)?;
        a.u16(&mut self.total_length)?;
        a.u8(&mut self.num_interfaces)?;
        a.u8(&mut self.configuration_value)?;
        a.u8(&mut self.configuration_index)?;
        a.u8(&mut self.attributes)?;
        a.u8(&mut self.max_power)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_index: u8,
}

impl InterfaceDescriptor {
    pub const LENGTH: u8 = 9;
    pub const TYPE: u8 = 0x04;
}

impl Wire for InterfaceDescriptor {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.u8(&mut self.length)?;
        a.u8(&mut self.descriptor_type)?;
        a.u8(&mut self.interface_number)?;
        a.u8(&mut self.alternate_setting)?;
        a.u8(&mut self.num_endpoints)?;
        a.u8(&mut self.interface_class)?;
        a.u8(&mut self.interface_subclass)?;
        a.u8(&mut self.interface_protocol)?;
        a.u8(&mut self.interface_index)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LENGTH: u8 = 7;
    pub const TYPE: u8 = 0x05;

    pub fn transfer_type(&self) -> u64 {
        u64::from(self.attributes & ENDPOINT_TYPE_MASK)
    }

    pub fn is_in(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
    }
}

impl Wire for EndpointDescriptor {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.u8(&mut self.length)?;
        a.u8(&mut self.descriptor_type)?;
        a.u8(&mut self.address)?;
        a.u8(&mut self.attributes)?;
        a.u16(&mut self.max_packet_size)?;
        a.u8(&mut self.interval)
    }
}

/// Derived per-endpoint information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeInfo {
    pub number: u64,
    pub max_packet_size: u64,
    pub pipe_type: u64,
    pub direction: u64,
    pub interval: u64,
}

impl PipeInfo {
    /// The default control pipe of a device
    pub fn control(max_packet_size0: u8) -> Self {
        Self {
            number: 0,
            max_packet_size: u64::from(max_packet_size0),
            pipe_type: PIPE_TYPE_CONTROL,
            direction: PIPE_DIR_IN_OUT,
            interval: 0,
        }
    }

    /// Control endpoints are bidirectional; others follow the address direction bit
    pub fn for_endpoint(ep: &EndpointDescriptor) -> Self {
        let pipe_type = ep.transfer_type();
        let direction = if pipe_type == PIPE_TYPE_CONTROL {
            PIPE_DIR_IN_OUT
        } else if ep.is_in() {
            PIPE_DIR_IN
        } else {
            PIPE_DIR_OUT
        };
        Self {
            number: u64::from(ep.address),
            max_packet_size: max_packet_size(ep.max_packet_size),
            pipe_type,
            direction,
            interval: u64::from(ep.interval),
        }
    }
}

impl Wire for PipeInfo {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.number)?;
        a.word(&mut self.max_packet_size)?;
        a.word(&mut self.pipe_type)?;
        a.word(&mut self.direction)?;
        a.word(&mut self.interval)
    }
}

/// Root record of the flat buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfoRecord {
    pub descriptor: DeviceDescriptor,
    pub pipe0: PipeInfo,
    pub configs: u64,
    pub active_config: u64,
    pub active_interfaces: [u64; MAX_INTERFACES],
}

impl Wire for DeviceInfoRecord {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        self.descriptor.fields(a)?;
        self.pipe0.fields(a)?;
        a.word(&mut self.configs)?;
        a.word(&mut self.active_config)?;
        for slot in self.active_interfaces.iter_mut() {
            a.word(slot)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigurationRecord {
    pub descriptor: ConfigurationDescriptor,
    pub interface_count: u64,
    pub interfaces: u64,
}

impl Wire for ConfigurationRecord {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        self.descriptor.fields(a)?;
        a.word(&mut self.interface_count)?;
        a.word(&mut self.interfaces)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub alt_settings: u64,
    pub alt_count: u64,
    pub active_alt: u64,
}

impl Wire for InterfaceRecord {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.alt_settings)?;
        a.word(&mut self.alt_count)?;
        a.word(&mut self.active_alt)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AltSettingRecord {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: u64,
    pub pipes: u64,
}

impl Wire for AltSettingRecord {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        self.descriptor.fields(a)?;
        a.word(&mut self.endpoints)?;
        a.word(&mut self.pipes)
    }
}
