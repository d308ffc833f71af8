//! Test utilities for wdshim
//!
//! Builders for descriptor trees, so the matcher, serializer and dispatcher
//! can be exercised without real hardware.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_mock_device, create_mock_bus_list};
//!
//! let device = create_mock_device(0x03fd, 0x0008);
//! assert_eq!(device.vendor_id(), 0x03fd);
//!
//! let buses = create_mock_bus_list(vec![device]);
//! assert_eq!(buses[0].devices.len(), 1);
//! ```

use crate::usb_types::{UsbAltSetting, UsbBus, UsbConfiguration, UsbDevice, UsbInterface, group_by_bus};
use protocol::{ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};

/// Create a device descriptor with the given identity
pub fn create_mock_device_descriptor(
    vendor_id: u16,
    product_id: u16,
    class: u8,
    subclass: u8,
) -> DeviceDescriptor {
    DeviceDescriptor {
        length: DeviceDescriptor::LENGTH,
        descriptor_type: DeviceDescriptor::TYPE,
        usb_version: 0x0200,
        device_class: class,
        device_subclass: subclass,
        device_protocol: 0,
        max_packet_size0: 64,
        vendor_id,
        product_id,
        device_version: 0x0100,
        manufacturer_index: 1,
        product_index: 2,
        serial_number_index: 0,
        num_configurations: 1,
    }
}

/// Create an endpoint descriptor
pub fn create_mock_endpoint(address: u8, attributes: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        length: EndpointDescriptor::LENGTH,
        descriptor_type: EndpointDescriptor::TYPE,
        address,
        attributes,
        max_packet_size,
        interval: 0,
    }
}

/// Create an alternate setting with the given class triple and endpoints
pub fn create_mock_alt_setting(
    interface_number: u8,
    alternate: u8,
    class: (u8, u8, u8),
    endpoints: Vec<EndpointDescriptor>,
) -> UsbAltSetting {
    UsbAltSetting {
        descriptor: InterfaceDescriptor {
            length: InterfaceDescriptor::LENGTH,
            descriptor_type: InterfaceDescriptor::TYPE,
            interface_number,
            alternate_setting: alternate,
            num_endpoints: endpoints.len() as u8,
            interface_class: class.0,
            interface_subclass: class.1,
            interface_protocol: class.2,
            interface_index: 0,
        },
        endpoints,
    }
}

/// Create a configuration around the given interfaces
pub fn create_mock_configuration(value: u8, interfaces: Vec<UsbInterface>) -> UsbConfiguration {
    let endpoint_bytes: usize = interfaces
        .iter()
        .flat_map(|i| i.alt_settings.iter())
        .map(|a| 9 + 7 * a.endpoints.len())
        .sum();
    UsbConfiguration {
        descriptor: ConfigurationDescriptor {
            length: ConfigurationDescriptor::LENGTH,
            descriptor_type: ConfigurationDescriptor::TYPE,
            total_length: (9 + endpoint_bytes) as u16,
            num_interfaces: interfaces.len() as u8,
            configuration_value: value,
            configuration_index: 0,
            attributes: 0x80,
            max_power: 50,
        },
        interfaces,
    }
}

/// Create a vendor-specific device with one interface, one alternate
/// setting and a bulk IN/OUT endpoint pair
pub fn create_mock_device(vendor_id: u16, product_id: u16) -> UsbDevice {
    create_mock_device_with_class(vendor_id, product_id, (0xff, 0x00), (0xff, 0x00, 0x00))
}

/// Create a single-interface device with explicit device and interface classes
pub fn create_mock_device_with_class(
    vendor_id: u16,
    product_id: u16,
    device_class: (u8, u8),
    interface_class: (u8, u8, u8),
) -> UsbDevice {
    let alt = create_mock_alt_setting(
        0,
        0,
        interface_class,
        vec![
            create_mock_endpoint(0x02, 0x02, 512),
            create_mock_endpoint(0x86, 0x02, 512),
        ],
    );
    UsbDevice {
        bus_number: 1,
        address: 2,
        descriptor: create_mock_device_descriptor(
            vendor_id,
            product_id,
            device_class.0,
            device_class.1,
        ),
        configurations: vec![create_mock_configuration(
            1,
            vec![UsbInterface {
                alt_settings: vec![alt],
            }],
        )],
    }
}

/// Create a device with two interfaces, the second carrying two alternate settings
pub fn create_mock_composite_device(vendor_id: u16, product_id: u16) -> UsbDevice {
    let first = UsbInterface {
        alt_settings: vec![create_mock_alt_setting(
            0,
            0,
            (0x03, 0x00, 0x00),
            vec![create_mock_endpoint(0x81, 0x03, 8)],
        )],
    };
    let second = UsbInterface {
        alt_settings: vec![
            create_mock_alt_setting(1, 0, (0xff, 0x01, 0x02), vec![]),
            create_mock_alt_setting(
                1,
                1,
                (0xff, 0x01, 0x02),
                vec![
                    create_mock_endpoint(0x02, 0x02, 64),
                    create_mock_endpoint(0x83, 0x01, 0x1400),
                    create_mock_endpoint(0x04, 0x00, 8),
                ],
            ),
        ],
    };
    let mut device = create_mock_device(vendor_id, product_id);
    device.configurations = vec![create_mock_configuration(1, vec![first, second])];
    device
}

/// Place devices on buses according to their bus numbers
pub fn create_mock_bus_list(devices: Vec<UsbDevice>) -> Vec<UsbBus> {
    group_by_bus(devices)
}
