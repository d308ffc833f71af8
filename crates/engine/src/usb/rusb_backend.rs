//! rusb-backed USB access
//!
//! Builds the descriptor tree from libusb and wraps device handles. Kernel
//! drivers are detached from an interface before it is claimed and
//! reattached when it is released.

use super::{UsbBackend, UsbHandle};
use common::{UsbAltSetting, UsbBus, UsbConfiguration, UsbDevice, UsbInterface, group_by_bus};
use protocol::{ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use rusb::{Context, Device, DeviceHandle, SyncType, TransferType, UsageType, UsbContext, Version};
use std::time::Duration;
use tracing::{debug, info, warn};

/// USB backend on a private libusb context
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> rusb::Result<Self> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    fn find(&self, bus: u8, address: u8) -> rusb::Result<Device<Context>> {
        self.context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == bus && d.address() == address)
            .ok_or(rusb::Error::NoDevice)
    }
}

impl UsbBackend for RusbBackend {
    fn enumerate(&mut self) -> rusb::Result<Vec<UsbBus>> {
        let mut devices = Vec::new();
        for device in self.context.devices()?.iter() {
            match read_device(&device) {
                Ok(dev) => devices.push(dev),
                Err(e) => warn!(
                    "Skipping device at bus {} addr {}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }
        info!("Enumerated {} USB devices", devices.len());
        Ok(group_by_bus(devices))
    }

    fn open(&mut self, device: &UsbDevice) -> rusb::Result<Box<dyn UsbHandle>> {
        let handle = self.find(device.bus_number, device.address)?.open()?;
        debug!("Opened {}", device.label());
        Ok(Box::new(RusbHandle {
            handle,
            detached: Vec::new(),
        }))
    }
}

/// Open libusb device handle
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    /// Interfaces whose kernel driver we detached
    detached: Vec<u8>,
}

impl UsbHandle for RusbHandle {
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        match self.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match self.handle.detach_kernel_driver(interface) {
                    Ok(()) => self.detached.push(interface),
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    ),
                }
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }
        self.handle.claim_interface(interface)?;
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)?;
        debug!("Released interface {}", interface);
        if let Some(pos) = self.detached.iter().position(|&i| i == interface) {
            self.detached.remove(pos);
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
        Ok(())
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()> {
        self.handle.set_alternate_setting(interface, setting)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .write_control(request_type, request, value, index, buf, timeout)
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn write_bulk(&mut self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, buf, timeout)
    }
}

/// Read one device's full descriptor tree
fn read_device<T: UsbContext>(device: &Device<T>) -> rusb::Result<UsbDevice> {
    let desc = device.device_descriptor()?;
    let descriptor = DeviceDescriptor {
        length: DeviceDescriptor::LENGTH,
        descriptor_type: DeviceDescriptor::TYPE,
        usb_version: bcd(desc.usb_version()),
        device_class: desc.class_code(),
        device_subclass: desc.sub_class_code(),
        device_protocol: desc.protocol_code(),
        max_packet_size0: desc.max_packet_size(),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        device_version: bcd(desc.device_version()),
        manufacturer_index: desc.manufacturer_string_index().unwrap_or(0),
        product_index: desc.product_string_index().unwrap_or(0),
        serial_number_index: desc.serial_number_string_index().unwrap_or(0),
        num_configurations: desc.num_configurations(),
    };

    let mut configurations = Vec::with_capacity(desc.num_configurations() as usize);
    for index in 0..desc.num_configurations() {
        let config = device.config_descriptor(index)?;
        let interfaces: Vec<UsbInterface> = config
            .interfaces()
            .map(|iface| UsbInterface {
                alt_settings: iface.descriptors().map(|alt| read_alt_setting(&alt)).collect(),
            })
            .collect();
        let total_length = 9 + interfaces
            .iter()
            .flat_map(|i| i.alt_settings.iter())
            .map(|a| 9 + 7 * a.endpoints.len())
            .sum::<usize>();
        let attributes =
            0x80 | (u8::from(config.self_powered()) << 6) | (u8::from(config.remote_wakeup()) << 5);
        configurations.push(UsbConfiguration {
            descriptor: ConfigurationDescriptor {
                length: ConfigurationDescriptor::LENGTH,
                descriptor_type: ConfigurationDescriptor::TYPE,
                total_length: total_length.min(u16::MAX as usize) as u16,
                num_interfaces: config.num_interfaces(),
                configuration_value: config.number(),
                configuration_index: config.description_string_index().unwrap_or(0),
                attributes,
                max_power: (config.max_power() / 2).min(u16::from(u8::MAX)) as u8,
            },
            interfaces,
        });
    }

    Ok(UsbDevice {
        bus_number: device.bus_number(),
        address: device.address(),
        descriptor,
        configurations,
    })
}

fn read_alt_setting(alt: &rusb::InterfaceDescriptor<'_>) -> UsbAltSetting {
    let endpoints: Vec<EndpointDescriptor> = alt
        .endpoint_descriptors()
        .map(|ep| EndpointDescriptor {
            length: EndpointDescriptor::LENGTH,
            descriptor_type: EndpointDescriptor::TYPE,
            address: ep.address(),
            attributes: endpoint_attributes(ep.transfer_type(), ep.sync_type(), ep.usage_type()),
            max_packet_size: ep.max_packet_size(),
            interval: ep.interval(),
        })
        .collect();
    UsbAltSetting {
        descriptor: InterfaceDescriptor {
            length: InterfaceDescriptor::LENGTH,
            descriptor_type: InterfaceDescriptor::TYPE,
            interface_number: alt.interface_number(),
            alternate_setting: alt.setting_number(),
            num_endpoints: alt.num_endpoints(),
            interface_class: alt.class_code(),
            interface_subclass: alt.sub_class_code(),
            interface_protocol: alt.protocol_code(),
            interface_index: alt.description_string_index().unwrap_or(0),
        },
        endpoints,
    }
}

/// Binary-coded decimal form of a descriptor version
fn bcd(version: Version) -> u16 {
    let major = u16::from(version.major());
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | (u16::from(version.minor()) << 4)
        | u16::from(version.sub_minor())
}

/// Raw `bmAttributes` from libusb's decoded endpoint fields
fn endpoint_attributes(transfer: TransferType, sync: SyncType, usage: UsageType) -> u8 {
    let transfer = match transfer {
        TransferType::Control => 0,
        TransferType::Isochronous => 1,
        TransferType::Bulk => 2,
        TransferType::Interrupt => 3,
    };
    let sync = match sync {
        SyncType::NoSync => 0,
        SyncType::Asynchronous => 1,
        SyncType::Adaptive => 2,
        SyncType::Synchronous => 3,
    };
    let usage = match usage {
        UsageType::Data => 0,
        UsageType::Feedback => 1,
        UsageType::FeedbackData => 2,
        UsageType::Reserved => 3,
    };
    transfer | (sync << 2) | (usage << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcd() {
        assert_eq!(bcd(Version(2, 0, 0)), 0x0200);
        assert_eq!(bcd(Version(1, 1, 0)), 0x0110);
        assert_eq!(bcd(Version(3, 2, 1)), 0x0321);
        assert_eq!(bcd(Version(12, 3, 4)), 0x1234);
    }

    #[test]
    fn test_endpoint_attributes() {
        assert_eq!(
            endpoint_attributes(TransferType::Bulk, SyncType::NoSync, UsageType::Data),
            0x02
        );
        assert_eq!(
            endpoint_attributes(
                TransferType::Isochronous,
                SyncType::Asynchronous,
                UsageType::Feedback
            ),
            0x15
        );
        assert_eq!(
            endpoint_attributes(TransferType::Interrupt, SyncType::NoSync, UsageType::Data),
            0x03
        );
    }
}
