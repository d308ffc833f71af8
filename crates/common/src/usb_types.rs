//! USB descriptor tree
//!
//! Backend-neutral snapshot of the enumerated USB topology. The USB backend
//! builds it once and owns it for the life of the process; the engine
//! refers to a device in it by [`DeviceRef`] rather than holding a copy.

use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor,
};

/// One bus and the devices found on it, in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbBus {
    pub number: u8,
    pub devices: Vec<UsbDevice>,
}

/// An enumerated device and its full configuration tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbDevice {
    pub bus_number: u8,
    pub address: u8,
    pub descriptor: DeviceDescriptor,
    pub configurations: Vec<UsbConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbConfiguration {
    pub descriptor: ConfigurationDescriptor,
    pub interfaces: Vec<UsbInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbInterface {
    pub alt_settings: Vec<UsbAltSetting>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbAltSetting {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Position of a device inside an enumerated bus list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub bus: usize,
    pub device: usize,
}

impl UsbDevice {
    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id
    }

    /// First alternate setting of the first interface of the first configuration
    pub fn primary_alt_setting(&self) -> Option<&UsbAltSetting> {
        self.configurations
            .first()?
            .interfaces
            .first()?
            .alt_settings
            .first()
    }

    /// Every alternate setting of every interface of every configuration
    pub fn alt_settings(&self) -> impl Iterator<Item = &UsbAltSetting> {
        self.configurations
            .iter()
            .flat_map(|c| c.interfaces.iter())
            .flat_map(|i| i.alt_settings.iter())
    }

    /// `VID:PID` label for logs
    pub fn label(&self) -> String {
        format!(
            "{:04x}:{:04x} (bus {:03} addr {:03})",
            self.vendor_id(),
            self.product_id(),
            self.bus_number,
            self.address
        )
    }
}

/// Look up a device by reference
pub fn device_at(buses: &[UsbBus], at: DeviceRef) -> Option<&UsbDevice> {
    buses.get(at.bus)?.devices.get(at.device)
}

/// Group devices by bus number, keeping first-seen order of buses and devices
pub fn group_by_bus(devices: Vec<UsbDevice>) -> Vec<UsbBus> {
    let mut buses: Vec<UsbBus> = Vec::new();
    for device in devices {
        match buses.iter_mut().find(|b| b.number == device.bus_number) {
            Some(bus) => bus.devices.push(device),
            None => buses.push(UsbBus {
                number: device.bus_number,
                devices: vec![device],
            }),
        }
    }
    buses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(bus: u8, address: u8) -> UsbDevice {
        UsbDevice {
            bus_number: bus,
            address,
            ..Default::default()
        }
    }

    #[test]
    fn test_group_by_bus_keeps_order() {
        let buses = group_by_bus(vec![device(2, 1), device(1, 4), device(2, 7)]);
        assert_eq!(buses.len(), 2);
        assert_eq!(buses[0].number, 2);
        assert_eq!(buses[0].devices.len(), 2);
        assert_eq!(buses[0].devices[1].address, 7);
        assert_eq!(buses[1].number, 1);
    }

    #[test]
    fn test_device_at() {
        let buses = group_by_bus(vec![device(1, 1), device(1, 2)]);
        let found = device_at(&buses, DeviceRef { bus: 0, device: 1 }).unwrap();
        assert_eq!(found.address, 2);
        assert!(device_at(&buses, DeviceRef { bus: 1, device: 0 }).is_none());
    }

    #[test]
    fn test_primary_alt_setting_missing() {
        assert!(device(1, 1).primary_alt_setting().is_none());
    }
}
