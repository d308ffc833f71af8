//! Device matching against registered match tables

use common::{DeviceRef, UsbBus, UsbDevice};
use protocol::MatchEntry;

/// Whether `device` satisfies `entry`
///
/// Vendor, product, device class and device subclass must all be equal,
/// and some alternate setting of some interface must carry the entry's
/// interface subclass and protocol. The interface class is not compared.
pub fn device_matches(device: &UsbDevice, entry: &MatchEntry) -> bool {
    let d = &device.descriptor;
    d.vendor_id == entry.vendor_id
        && d.product_id == entry.product_id
        && d.device_class == entry.device_class
        && d.device_subclass == entry.device_subclass
        && device.alt_settings().any(|alt| {
            alt.descriptor.interface_subclass == entry.interface_subclass
                && alt.descriptor.interface_protocol == entry.interface_protocol
        })
}

/// First device matching the tables, trying entries in order and buses and
/// devices in enumeration order
pub fn find_match(buses: &[UsbBus], tables: &[MatchEntry]) -> Option<DeviceRef> {
    tables.iter().find_map(|entry| {
        buses.iter().enumerate().find_map(|(bus, b)| {
            b.devices
                .iter()
                .position(|dev| device_matches(dev, entry))
                .map(|device| DeviceRef { bus, device })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        create_mock_bus_list, create_mock_composite_device, create_mock_device,
        create_mock_device_with_class,
    };

    fn entry_for(device: &UsbDevice) -> MatchEntry {
        let alt = device.primary_alt_setting().unwrap();
        MatchEntry {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            device_class: device.descriptor.device_class,
            device_subclass: device.descriptor.device_subclass,
            interface_class: alt.descriptor.interface_class,
            interface_subclass: alt.descriptor.interface_subclass,
            interface_protocol: alt.descriptor.interface_protocol,
        }
    }

    #[test]
    fn test_exact_match() {
        let device = create_mock_device(0x03fd, 0x0008);
        assert!(device_matches(&device, &entry_for(&device)));
    }

    #[test]
    fn test_device_fields_must_equal() {
        let device = create_mock_device(0x03fd, 0x0008);
        let base = entry_for(&device);
        for entry in [
            MatchEntry { vendor_id: 1, ..base },
            MatchEntry { product_id: 1, ..base },
            MatchEntry { device_class: 0, ..base },
            MatchEntry { device_subclass: 9, ..base },
            MatchEntry { interface_subclass: 9, ..base },
            MatchEntry { interface_protocol: 9, ..base },
        ] {
            assert!(!device_matches(&device, &entry), "{:?}", entry);
        }
    }

    #[test]
    fn test_interface_class_not_compared() {
        let device = create_mock_device(0x03fd, 0x0008);
        let entry = MatchEntry {
            interface_class: 0x42,
            ..entry_for(&device)
        };
        assert!(device_matches(&device, &entry));
    }

    #[test]
    fn test_any_alt_setting_satisfies_interface_fields() {
        let device = create_mock_composite_device(0x1234, 0x5678);
        let entry = MatchEntry {
            vendor_id: 0x1234,
            product_id: 0x5678,
            device_class: 0xff,
            device_subclass: 0x00,
            interface_class: 0,
            interface_subclass: 0x01,
            interface_protocol: 0x02,
        };
        assert!(device_matches(&device, &entry));
    }

    #[test]
    fn test_first_match_wins() {
        let mut first = create_mock_device(0x03fd, 0x0008);
        first.bus_number = 1;
        first.address = 5;
        let mut second = create_mock_device(0x03fd, 0x0008);
        second.bus_number = 2;
        second.address = 3;
        let other = create_mock_device_with_class(0x0403, 0x6010, (0, 0), (0xff, 0xff, 0xff));
        let entry = entry_for(&first);

        let buses = create_mock_bus_list(vec![other.clone(), first, second]);
        let found = find_match(&buses, &[entry]).unwrap();
        assert_eq!(found, DeviceRef { bus: 0, device: 1 });

        let tables = [entry_for(&other), entry];
        assert_eq!(find_match(&buses, &tables), Some(DeviceRef { bus: 0, device: 0 }));
    }

    #[test]
    fn test_no_match() {
        let buses = create_mock_bus_list(vec![create_mock_device(0x03fd, 0x0008)]);
        let entry = MatchEntry {
            vendor_id: 0xdead,
            ..Default::default()
        };
        assert!(find_match(&buses, &[entry]).is_none());
        assert!(find_match(&buses, &[]).is_none());
    }
}
