//! Flat device-data serialization
//!
//! USB_GET_DEVICE_DATA returns a device's whole descriptor tree as one
//! relocatable buffer. Records are laid out in a fixed order:
//!
//! ```text
//! device info
//! for each configuration:
//!     configuration record
//!     interface records (all of them, contiguous)
//!     for each interface, for each alternate setting:
//!         alternate-setting record
//!         endpoint descriptors
//!         pipe infos
//! ```
//!
//! Link fields hold offsets from the start of the buffer, 0 standing for
//! "none". Sizing and filling run the same traversal, so a buffer of
//! [`serialized_size`] bytes is always exactly filled.

use crate::error::{EngineError, Result};
use common::UsbDevice;
use protocol::{
    AltSettingRecord, ConfigurationRecord, DeviceInfoRecord, EndpointDescriptor, InterfaceRecord,
    MAX_INTERFACES, PipeInfo, ProtocolError, Wire, WordSize, align_up,
};

/// Length of the flat buffer for `device`
pub fn serialized_size(device: &UsbDevice, word: WordSize) -> usize {
    let mut flat = Flattener {
        out: None,
        word,
        cursor: 0,
    };
    // Without an output buffer nothing is encoded, so nothing can fail.
    let _ = flat.device(device);
    flat.cursor
}

/// Serialize into the start of `buf`, returning the number of bytes written
pub fn serialize_into(device: &UsbDevice, buf: &mut [u8], word: WordSize) -> Result<usize> {
    let needed = serialized_size(device, word);
    if buf.len() < needed {
        return Err(EngineError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    let mut flat = Flattener {
        out: Some(buf),
        word,
        cursor: 0,
    };
    flat.device(device)?;
    Ok(flat.cursor)
}

/// Serialize into a new buffer of exactly the serialized size
pub fn serialize(device: &UsbDevice, word: WordSize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; serialized_size(device, word)];
    serialize_into(device, &mut buf, word)?;
    Ok(buf)
}

struct Flattener<'a> {
    out: Option<&'a mut [u8]>,
    word: WordSize,
    cursor: usize,
}

impl Flattener<'_> {
    /// Reserve room for `count` records of `T` at the cursor
    fn reserve<T: Wire>(&mut self, count: usize) -> usize {
        let at = align_up(self.cursor, self.word.bytes());
        self.cursor = at + count * T::wire_size(self.word);
        at
    }

    fn emit<T: Wire>(&mut self, at: usize, value: &T) -> protocol::Result<()> {
        let Some(buf) = self.out.as_deref_mut() else {
            return Ok(());
        };
        let tail = buf.get_mut(at..).ok_or(ProtocolError::BufferTooSmall {
            needed: at,
            available: 0,
        })?;
        value.encode(tail, self.word)
    }

    fn device(&mut self, device: &UsbDevice) -> protocol::Result<()> {
        let root_at = self.reserve::<DeviceInfoRecord>(1);
        let mut root = DeviceInfoRecord {
            descriptor: device.descriptor,
            pipe0: PipeInfo::control(device.descriptor.max_packet_size0),
            ..Default::default()
        };

        for (c, config) in device.configurations.iter().enumerate() {
            let config_at = self.reserve::<ConfigurationRecord>(1);
            let interfaces_at = self.reserve::<InterfaceRecord>(config.interfaces.len());
            let iface_stride = InterfaceRecord::wire_size(self.word);

            if c == 0 {
                root.configs = config_at as u64;
                root.active_config = config_at as u64;
                for (j, slot) in root
                    .active_interfaces
                    .iter_mut()
                    .take(config.interfaces.len().min(MAX_INTERFACES))
                    .enumerate()
                {
                    *slot = (interfaces_at + j * iface_stride) as u64;
                }
            }

            for (j, iface) in config.interfaces.iter().enumerate() {
                let mut first_alt = 0;
                for alt in &iface.alt_settings {
                    let alt_at = self.reserve::<AltSettingRecord>(1);
                    let endpoints_at = self.reserve::<EndpointDescriptor>(alt.endpoints.len());
                    let pipes_at = self.reserve::<PipeInfo>(alt.endpoints.len());
                    if first_alt == 0 {
                        first_alt = alt_at;
                    }

                    let record = AltSettingRecord {
                        descriptor: alt.descriptor,
                        endpoints: if alt.endpoints.is_empty() { 0 } else { endpoints_at as u64 },
                        pipes: if alt.endpoints.is_empty() { 0 } else { pipes_at as u64 },
                    };
                    self.emit(alt_at, &record)?;

                    let ep_stride = EndpointDescriptor::wire_size(self.word);
                    let pipe_stride = PipeInfo::wire_size(self.word);
                    for (k, ep) in alt.endpoints.iter().enumerate() {
                        self.emit(endpoints_at + k * ep_stride, ep)?;
                        self.emit(pipes_at + k * pipe_stride, &PipeInfo::for_endpoint(ep))?;
                    }
                }

                let record = InterfaceRecord {
                    alt_settings: first_alt as u64,
                    alt_count: iface.alt_settings.len() as u64,
                    active_alt: first_alt as u64,
                };
                self.emit(interfaces_at + j * iface_stride, &record)?;
            }

            let record = ConfigurationRecord {
                descriptor: config.descriptor,
                interface_count: config.interfaces.len() as u64,
                interfaces: if config.interfaces.is_empty() { 0 } else { interfaces_at as u64 },
            };
            self.emit(config_at, &record)?;
        }

        self.emit(root_at, &root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_composite_device, create_mock_device};
    use protocol::descriptors::{PIPE_DIR_IN, PIPE_DIR_IN_OUT, PIPE_DIR_OUT, PIPE_TYPE_BULK};

    #[test]
    fn test_single_interface_size() {
        let device = create_mock_device(0x03fd, 0x0008);
        // device + config + iface + alt + 2 endpoints + 2 pipes
        assert_eq!(
            serialized_size(&device, WordSize::Eight),
            320 + 32 + 24 + 32 + 2 * 8 + 2 * 40
        );
        assert_eq!(
            serialized_size(&device, WordSize::Four),
            168 + 20 + 12 + 20 + 2 * 8 + 2 * 20
        );
    }

    #[test]
    fn test_device_without_configurations() {
        let mut device = create_mock_device(0x03fd, 0x0008);
        device.configurations.clear();
        let buf = serialize(&device, WordSize::Eight).unwrap();
        assert_eq!(buf.len(), 320);
        let root = DeviceInfoRecord::decode(&buf, WordSize::Eight).unwrap();
        assert_eq!(root.configs, 0);
        assert_eq!(root.active_config, 0);
        assert!(root.active_interfaces.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_links_are_buffer_offsets() {
        let word = WordSize::Eight;
        let device = create_mock_device(0x03fd, 0x0008);
        let buf = serialize(&device, word).unwrap();

        let root = DeviceInfoRecord::decode(&buf, word).unwrap();
        assert_eq!(root.descriptor.vendor_id, 0x03fd);
        assert_eq!(root.descriptor.length, 18);
        assert_eq!(root.pipe0.number, 0);
        assert_eq!(root.pipe0.max_packet_size, 64);
        assert_eq!(root.pipe0.direction, PIPE_DIR_IN_OUT);
        assert_eq!(root.configs, 320);
        assert_eq!(root.active_config, 320);
        assert_eq!(root.active_interfaces[0], 352);
        assert_eq!(root.active_interfaces[1], 0);

        let config = ConfigurationRecord::decode(&buf[320..], word).unwrap();
        assert_eq!(config.interface_count, 1);
        assert_eq!(config.interfaces, 352);

        let iface = InterfaceRecord::decode(&buf[352..], word).unwrap();
        assert_eq!(iface.alt_count, 1);
        assert_eq!(iface.alt_settings, 376);
        assert_eq!(iface.active_alt, 376);

        let alt = AltSettingRecord::decode(&buf[376..], word).unwrap();
        assert_eq!(alt.descriptor.num_endpoints, 2);
        assert_eq!(alt.endpoints, 408);
        assert_eq!(alt.pipes, 424);

        let ep = EndpointDescriptor::decode(&buf[416..], word).unwrap();
        assert_eq!(ep.address, 0x86);

        let out_pipe = PipeInfo::decode(&buf[424..], word).unwrap();
        assert_eq!(out_pipe.number, 0x02);
        assert_eq!(out_pipe.pipe_type, PIPE_TYPE_BULK);
        assert_eq!(out_pipe.direction, PIPE_DIR_OUT);
        let in_pipe = PipeInfo::decode(&buf[464..], word).unwrap();
        assert_eq!(in_pipe.direction, PIPE_DIR_IN);
        assert_eq!(in_pipe.max_packet_size, 512);
    }

    #[test]
    fn test_composite_layout() {
        let word = WordSize::Four;
        let device = create_mock_composite_device(0x1234, 0x5678);
        let buf = serialize(&device, word).unwrap();
        assert_eq!(buf.len(), serialized_size(&device, word));

        let root = DeviceInfoRecord::decode(&buf, word).unwrap();
        let config = ConfigurationRecord::decode(&buf[root.configs as usize..], word).unwrap();
        assert_eq!(config.interface_count, 2);
        assert_eq!(root.active_interfaces[0], config.interfaces);
        assert_eq!(root.active_interfaces[1], config.interfaces + 12);

        let second = InterfaceRecord::decode(&buf[root.active_interfaces[1] as usize..], word).unwrap();
        assert_eq!(second.alt_count, 2);
        let alt0 = AltSettingRecord::decode(&buf[second.alt_settings as usize..], word).unwrap();
        assert_eq!(alt0.descriptor.alternate_setting, 0);
        assert_eq!(alt0.endpoints, 0);
        assert_eq!(alt0.pipes, 0);

        // alt 1 follows alt 0 directly since alt 0 has no endpoints
        let alt1_at = second.alt_settings as usize + 20;
        let alt1 = AltSettingRecord::decode(&buf[alt1_at..], word).unwrap();
        assert_eq!(alt1.descriptor.alternate_setting, 1);
        assert_eq!(alt1.endpoints as usize, alt1_at + 20);
        assert_eq!(alt1.pipes as usize, alt1_at + 20 + 3 * 8);
        assert_eq!(buf.len(), alt1.pipes as usize + 3 * 20);

        let iso = PipeInfo::decode(&buf[alt1.pipes as usize + 20..], word).unwrap();
        assert_eq!(iso.max_packet_size, 0x400 * 3);
        assert_eq!(iso.direction, PIPE_DIR_IN);
        let control = PipeInfo::decode(&buf[alt1.pipes as usize + 40..], word).unwrap();
        assert_eq!(control.direction, PIPE_DIR_IN_OUT);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let device = create_mock_device(0x03fd, 0x0008);
        let mut buf = vec![0u8; 100];
        let err = serialize_into(&device, &mut buf, WordSize::Eight).unwrap_err();
        assert!(matches!(err, EngineError::BufferTooSmall { available: 100, .. }));
    }
}
