//! The single hardware context
//!
//! Everything the emulated driver remembers between requests lives here:
//! the claimed parallel port and its registered bases, the enumerated USB
//! topology, the matched device and its open handle. The dispatcher owns
//! one session and hands each decoded payload to the matching method.

use crate::error::{EngineError, Result};
use crate::memory::UserMemory;
use crate::parport::{
    DEFAULT_PATH_PREFIX, IEEE1284_MODE_COMPAT, ParallelPort, PortBases, PortEmulator, PortOpener,
    parport_path,
};
use crate::usb::{self, UsbBackend, UsbHandle, UsbRequest};
use common::{DeviceRef, UsbBus, UsbDevice, device_at, hexdump};
use protocol::types::{EVENT_ACTION_INSERT, PULL_EVENT_ID, PULL_UNIQUE_ID};
use protocol::{
    CardRegister, Event, MatchEntry, PortTransfer, UsbGetDeviceData, UsbSetInterface, UsbTransfer,
    WordSize,
};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Session settings taken from the configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub word: WordSize,
    pub path_prefix: String,
    pub force_pc3_ident: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            word: WordSize::NATIVE,
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            force_pc3_ident: false,
        }
    }
}

pub struct Session {
    word: WordSize,
    path_prefix: String,

    ports: Box<dyn PortOpener>,
    port: Option<Box<dyn ParallelPort>>,
    bases: Option<PortBases>,
    emulator: PortEmulator,

    backend: Box<dyn UsbBackend>,
    buses: Vec<UsbBus>,
    enumerated: bool,
    matched: Option<DeviceRef>,
    card_type: u64,
    event_handle: u64,
    usb: Option<Box<dyn UsbHandle>>,
    claimed: Vec<u8>,
}

impl Session {
    pub fn new(
        ports: Box<dyn PortOpener>,
        backend: Box<dyn UsbBackend>,
        options: SessionOptions,
    ) -> Self {
        Self {
            word: options.word,
            path_prefix: options.path_prefix,
            ports,
            port: None,
            bases: None,
            emulator: PortEmulator::new(options.force_pc3_ident),
            backend,
            buses: Vec::new(),
            enumerated: false,
            matched: None,
            card_type: 0,
            event_handle: 0,
            usb: None,
            claimed: Vec::new(),
        }
    }

    pub fn word_size(&self) -> WordSize {
        self.word
    }

    pub fn bases(&self) -> Option<PortBases> {
        self.bases
    }

    pub fn port_handle(&self) -> Option<u64> {
        self.port.as_ref().map(|p| p.handle())
    }

    pub fn last_data_write(&self) -> u8 {
        self.emulator.last_data_write()
    }

    pub fn buses(&self) -> &[UsbBus] {
        &self.buses
    }

    pub fn matched_device(&self) -> Option<&UsbDevice> {
        device_at(&self.buses, self.matched?)
    }

    pub fn card_type(&self) -> u64 {
        self.card_type
    }

    pub fn usb_open(&self) -> bool {
        self.usb.is_some()
    }

    /// Enumerate the USB topology unless that already happened
    pub fn enumerate(&mut self) -> Result<()> {
        if self.enumerated {
            return Ok(());
        }
        let buses = self.backend.enumerate()?;
        self.set_buses(buses);
        Ok(())
    }

    /// Install an already enumerated topology
    pub fn set_buses(&mut self, buses: Vec<UsbBus>) {
        let count: usize = buses.iter().map(|b| b.devices.len()).sum();
        debug!("Topology: {} buses, {} devices", buses.len(), count);
        self.release_usb();
        self.buses = buses;
        self.matched = None;
        self.enumerated = true;
    }

    pub fn card_register(&mut self, card: &mut CardRegister) -> Result<()> {
        let bases = PortBases {
            primary: card.primary_base(),
            auxiliary: card.auxiliary_base(),
        };
        debug!(
            "Card register: items={}, base={:#x}, aux={:?}",
            card.item_count, bases.primary, bases.auxiliary
        );
        self.bases = Some(bases);

        match self.claim_port(bases.primary) {
            Ok(handle) => {
                if let Some(aux) = bases.auxiliary {
                    debug!("ECP mode requested at {:#x}, staying in compatibility mode", aux);
                }
                card.card_handle = handle;
                Ok(())
            }
            Err(e) => {
                card.card_handle = 0;
                Err(e)
            }
        }
    }

    /// Open, claim and negotiate the port serving `base`, reusing an open one
    fn claim_port(&mut self, base: u64) -> Result<u64> {
        if let Some(port) = &self.port {
            debug!("Reusing open parallel port {}", port.handle());
            return Ok(port.handle());
        }

        let path = parport_path(&self.path_prefix, base);
        let mut port = self.ports.open(&path).inspect_err(|e| {
            warn!("Can't open {}: {}", path.display(), e);
        })?;
        port.claim()?;
        if let Err(e) = port.negotiate(IEEE1284_MODE_COMPAT) {
            warn!("Compatibility mode negotiation on {} failed: {}", path.display(), e);
            if let Err(e) = port.release() {
                debug!("Release after failed negotiation: {}", e);
            }
            return Err(e);
        }

        let handle = port.handle();
        info!("Claimed {} (handle {})", path.display(), handle);
        self.port = Some(port);
        Ok(handle)
    }

    pub fn card_unregister(&mut self, card: &CardRegister) {
        match self.port.take_if(|p| p.handle() == card.card_handle) {
            Some(mut port) => {
                if let Err(e) = port.release() {
                    warn!("Releasing parallel port failed: {}", e);
                }
                info!("Released parallel port (handle {})", card.card_handle);
                self.bases = None;
            }
            None => debug!("Card unregister for unknown handle {}", card.card_handle),
        }
    }

    pub fn port_transfer(&mut self, tr: &mut PortTransfer) -> Result<()> {
        self.emulator
            .transfer(self.port.as_deref_mut(), self.bases.as_ref(), tr)
    }

    /// Run the matcher over the registered tables and advance the event handle
    pub fn event_register(&mut self, event: &mut Event) -> Result<()> {
        if let Err(e) = self.enumerate() {
            warn!("USB enumeration failed: {}", e);
        }

        let tables = event.declared_tables();
        for entry in tables {
            debug!(
                "Match table: {:04x}:{:04x} class={:#x}/{:#x} interface={:#x}/{:#x}/{:#x}",
                entry.vendor_id,
                entry.product_id,
                entry.device_class,
                entry.device_subclass,
                entry.interface_class,
                entry.interface_subclass,
                entry.interface_protocol
            );
        }

        match usb::find_match(&self.buses, tables) {
            Some(found) => {
                if self.matched != Some(found) {
                    self.release_usb();
                }
                self.matched = Some(found);
                self.card_type = event.header.card_type;
                if let Some(device) = device_at(&self.buses, found) {
                    info!("Matched USB device {}", device.label());
                }
            }
            None => debug!("No USB device matched {} tables", tables.len()),
        }

        self.event_handle = self.word.truncate(self.event_handle.wrapping_add(1));
        event.header.handle = self.event_handle;
        Ok(())
    }

    /// Report the matched device as an insertion event
    pub fn event_pull(&mut self, event: &mut Event) {
        let Some(device) = self.matched_device() else {
            debug!("Event pull with no matched device");
            return;
        };

        let (class, subclass, protocol) = device
            .primary_alt_setting()
            .map(|alt| {
                (
                    alt.descriptor.interface_class,
                    alt.descriptor.interface_subclass,
                    alt.descriptor.interface_protocol,
                )
            })
            .unwrap_or_default();
        let entry = MatchEntry {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            device_class: device.descriptor.device_class,
            device_subclass: device.descriptor.device_subclass,
            interface_class: class,
            interface_subclass: subclass,
            interface_protocol: protocol,
        };

        event.header.card_type = self.card_type;
        event.header.action = EVENT_ACTION_INSERT;
        event.header.status = 0;
        event.header.event_id = PULL_EVENT_ID;
        event.header.set_usb_unique_id(PULL_UNIQUE_ID);
        match event.tables.first_mut() {
            Some(first) => *first = entry,
            None => event.tables.push(entry),
        }
    }

    /// Claim an interface of the first configuration and select an alternate setting
    pub fn usb_set_interface(&mut self, sel: &UsbSetInterface) -> Result<()> {
        let Some(device) = self.matched_device() else {
            debug!("Set interface with no matched device");
            return Ok(());
        };
        let alt = device
            .configurations
            .first()
            .and_then(|c| c.interfaces.get(sel.interface_index as usize))
            .and_then(|i| i.alt_settings.get(sel.alternate_index as usize))
            .ok_or(EngineError::InvalidSelection {
                interface: sel.interface_index,
                alternate: sel.alternate_index,
            })?;
        let number = alt.descriptor.interface_number;
        let setting = alt.descriptor.alternate_setting;

        if !self.claimed.contains(&number) {
            self.open_usb()?
                .claim_interface(number)
                .inspect_err(|e| warn!("Claiming interface {} failed: {}", number, e))?;
            self.claimed.push(number);
        }
        self.open_usb()?
            .set_alternate_setting(number, setting)
            .inspect_err(|e| {
                warn!(
                    "Selecting alternate setting {} on interface {} failed: {}",
                    setting, number, e
                )
            })?;
        debug!("Interface {} alternate setting {}", number, setting);
        Ok(())
    }

    /// Size query (`bytes == 0`) or fill of the flat device-data buffer
    pub fn usb_get_device_data(
        &mut self,
        req: &mut UsbGetDeviceData,
        mem: &mut dyn UserMemory,
    ) -> Result<()> {
        let device = self.matched_device();
        if req.bytes == 0 {
            req.bytes = device.map_or(0, |d| usb::serialized_size(d, self.word)) as u64;
            debug!("Device data size: {}", req.bytes);
            return Ok(());
        }

        let device = device.ok_or(EngineError::NoDevice)?;
        let needed = usb::serialized_size(device, self.word);
        if (req.bytes as usize) < needed {
            return Err(EngineError::BufferTooSmall {
                needed,
                available: req.bytes as usize,
            });
        }
        let buf = usb::serialize(device, self.word)?;
        mem.write(req.buffer, &buf)?;
        debug!("Wrote {} bytes of device data", buf.len());
        Ok(())
    }

    /// Execute a control or bulk transfer through the client buffer
    ///
    /// `bytes_transferred` is only written when the transfer succeeds.
    pub fn usb_transfer(&mut self, tr: &mut UsbTransfer, mem: &mut dyn UserMemory) -> Result<()> {
        let request = UsbRequest::from_transfer(tr);
        let len = request.data_len(tr);
        let mut buf = if request.is_in() {
            vec![0u8; len]
        } else {
            mem.read_vec(tr.buffer, len)?
        };
        if !request.is_in() {
            trace!("OUT data:\n{}", hexdump(&buf));
        }

        let handle = self.open_usb()?;
        let n = usb::execute(handle, &request, &mut buf, Duration::from_millis(tr.timeout))?;

        if request.is_in() {
            let n = n.min(buf.len());
            trace!("IN data:\n{}", hexdump(&buf[..n]));
            mem.write(tr.buffer, &buf[..n])?;
        }
        tr.bytes_transferred = n as u64;
        Ok(())
    }

    /// Open the matched device if no handle is open yet
    fn open_usb(&mut self) -> Result<&mut dyn UsbHandle> {
        if self.usb.is_none() {
            let at = self.matched.ok_or(EngineError::NoDevice)?;
            let device = device_at(&self.buses, at).ok_or(EngineError::NoDevice)?;
            let handle = self.backend.open(device).inspect_err(|e| {
                warn!("Opening {} failed: {}", device.label(), e);
            })?;
            self.usb = Some(handle);
        }
        match self.usb.as_deref_mut() {
            Some(handle) => Ok(handle),
            None => Err(EngineError::NoDevice),
        }
    }

    /// Release claimed interfaces and close the USB handle
    pub fn release_usb(&mut self) {
        let Some(mut handle) = self.usb.take() else {
            return;
        };
        for interface in self.claimed.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }
        debug!("Closed USB handle");
    }
}
