//! Request payload structures
//!
//! Each type mirrors one C structure of the emulated driver ABI. Field
//! widths marked "word" follow [`WordSize`](crate::WordSize); pointers are
//! carried as plain addresses in the client's address space.

use crate::error::Result;
use crate::layout::{FieldAccess, Wire, WordSize, decode_array, encode_array};
use crate::opcode::MAGIC;
use crate::version::VERSION_STRING_LEN;

/// Number of resource items in a card description
pub const CARD_ITEMS: usize = 20;

/// Port transfer command: read one byte
pub const CMD_READ_BYTE: u64 = 10;
/// Port transfer command: write one byte
pub const CMD_WRITE_BYTE: u64 = 13;

/// Event action reported for a newly attached device
pub const EVENT_ACTION_INSERT: u64 = 1;
/// Event id reported by EVENT_PULL
pub const PULL_EVENT_ID: u64 = 109;
/// USB unique id reported by EVENT_PULL
pub const PULL_UNIQUE_ID: u64 = 110;

/// Envelope header preceding every request
///
/// `data` addresses the payload and `size` is its length in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub magic: u64,
    pub data: u64,
    pub size: u64,
}

impl Header {
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }
}

impl Wire for Header {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.magic)?;
        a.word(&mut self.data)?;
        a.word(&mut self.size)
    }
}

/// VERSION payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: u64,
    pub text: [u8; VERSION_STRING_LEN],
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            version: 0,
            text: [0; VERSION_STRING_LEN],
        }
    }
}

impl Wire for VersionInfo {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.version)?;
        a.bytes(&mut self.text)
    }
}

/// One register access (TRANSFER / MULTI_TRANSFER)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortTransfer {
    /// Absolute port address
    pub port: u64,
    /// [`CMD_READ_BYTE`] or [`CMD_WRITE_BYTE`]
    pub command: u64,
    pub bytes: u64,
    pub auto_increment: u64,
    pub options: u64,
    /// Data union; byte transfers use the low byte
    pub data: u64,
}

impl PortTransfer {
    pub fn byte(&self) -> u8 {
        (self.data & 0xff) as u8
    }

    pub fn set_byte(&mut self, value: u8) {
        self.data = (self.data & !0xff) | u64::from(value);
    }
}

impl Wire for PortTransfer {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.port)?;
        a.word(&mut self.command)?;
        a.word(&mut self.bytes)?;
        a.word(&mut self.auto_increment)?;
        a.word(&mut self.options)?;
        a.quad(&mut self.data)
    }
}

/// One resource item of a card description
///
/// The six-word union is kept raw; the I/O view uses its first three words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardItem {
    pub item: u64,
    pub not_sharable: u64,
    pub reserved: u64,
    pub options: u64,
    pub raw: [u64; 6],
}

impl CardItem {
    pub fn io(addr: u64, bytes: u64, bar: u64) -> Self {
        Self {
            raw: [addr, bytes, bar, 0, 0, 0],
            ..Default::default()
        }
    }

    pub fn io_addr(&self) -> u64 {
        self.raw[0]
    }

    pub fn io_bytes(&self) -> u64 {
        self.raw[1]
    }

    pub fn io_bar(&self) -> u64 {
        self.raw[2]
    }
}

impl Wire for CardItem {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.item)?;
        a.word(&mut self.not_sharable)?;
        a.word(&mut self.reserved)?;
        a.word(&mut self.options)?;
        for w in self.raw.iter_mut() {
            a.word(w)?;
        }
        Ok(())
    }
}

/// CARD_REGISTER / CARD_UNREGISTER payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRegister {
    pub item_count: u64,
    pub items: [CardItem; CARD_ITEMS],
    pub check_lock_only: u64,
    pub card_handle: u64,
    pub options: u64,
    pub name: [u8; 32],
    pub description: [u8; 100],
}

impl Default for CardRegister {
    fn default() -> Self {
        Self {
            item_count: 0,
            items: [CardItem::default(); CARD_ITEMS],
            check_lock_only: 0,
            card_handle: 0,
            options: 0,
            name: [0; 32],
            description: [0; 100],
        }
    }
}

impl CardRegister {
    /// Build a registration for a primary port base and optional auxiliary base
    pub fn with_ports(primary: u64, auxiliary: Option<u64>) -> Self {
        let mut card = Self {
            item_count: 1,
            ..Default::default()
        };
        card.items[0] = CardItem::io(primary, 3, 0);
        if let Some(aux) = auxiliary {
            card.item_count = 2;
            card.items[1] = CardItem::io(aux, 3, 0);
        }
        card
    }

    /// Base address of the primary (parallel) port
    pub fn primary_base(&self) -> u64 {
        self.items[0].io_addr()
    }

    /// Base address of the auxiliary (ECP) range, when one was supplied
    pub fn auxiliary_base(&self) -> Option<u64> {
        let addr = self.items[1].io_addr();
        (self.item_count > 1 && addr != 0).then_some(addr)
    }
}

impl Wire for CardRegister {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.item_count)?;
        for item in self.items.iter_mut() {
            item.fields(a)?;
        }
        a.word(&mut self.check_lock_only)?;
        a.word(&mut self.card_handle)?;
        a.word(&mut self.options)?;
        a.bytes(&mut self.name)?;
        a.bytes(&mut self.description)
    }
}

/// Standard 8-byte USB setup packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn from_bytes(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut raw = [0u8; 8];
        raw[0] = self.request_type;
        raw[1] = self.request;
        raw[2..4].copy_from_slice(&self.value.to_le_bytes());
        raw[4..6].copy_from_slice(&self.index.to_le_bytes());
        raw[6..8].copy_from_slice(&self.length.to_le_bytes());
        raw
    }

    /// Data stage flows device-to-host
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// USB_TRANSFER payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbTransfer {
    pub unique_id: u64,
    /// 0 selects the control pipe, otherwise an endpoint address
    pub pipe: u64,
    pub read: u64,
    pub options: u64,
    pub buffer: u64,
    pub buffer_size: u64,
    pub bytes_transferred: u64,
    pub setup: [u8; 8],
    /// Milliseconds
    pub timeout: u64,
}

impl UsbTransfer {
    pub fn setup_packet(&self) -> SetupPacket {
        SetupPacket::from_bytes(&self.setup)
    }

    pub fn is_read(&self) -> bool {
        self.read != 0
    }
}

impl Wire for UsbTransfer {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.unique_id)?;
        a.word(&mut self.pipe)?;
        a.word(&mut self.read)?;
        a.word(&mut self.options)?;
        a.word(&mut self.buffer)?;
        a.word(&mut self.buffer_size)?;
        a.word(&mut self.bytes_transferred)?;
        a.bytes(&mut self.setup)?;
        a.word(&mut self.timeout)
    }
}

/// USB_SET_INTERFACE payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbSetInterface {
    pub unique_id: u64,
    pub interface_index: u64,
    pub alternate_index: u64,
    pub options: u64,
}

impl Wire for UsbSetInterface {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.unique_id)?;
        a.word(&mut self.interface_index)?;
        a.word(&mut self.alternate_index)?;
        a.word(&mut self.options)
    }
}

/// USB_GET_DEVICE_DATA payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbGetDeviceData {
    pub unique_id: u64,
    pub buffer: u64,
    pub bytes: u64,
    pub options: u64,
}

impl Wire for UsbGetDeviceData {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.unique_id)?;
        a.word(&mut self.buffer)?;
        a.word(&mut self.bytes)?;
        a.word(&mut self.options)
    }
}

/// Device match criteria carried by events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
}

impl Wire for MatchEntry {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.u16(&mut self.vendor_id)?;
        a.u16(&mut self.product_id)?;
        a.u8(&mut self.device_class)?;
        a.u8(&mut self.device_subclass)?;
        a.u8(&mut self.interface_class)?;
        a.u8(&mut self.interface_subclass)?;
        a.u8(&mut self.interface_protocol)
    }
}

/// Fixed part of the EVENT_* payload, up to the match table array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventHeader {
    pub handle: u64,
    pub action: u64,
    pub status: u64,
    pub event_id: u64,
    pub card_type: u64,
    pub kernel_plugin: u64,
    pub options: u64,
    /// Bus-specific union; the USB view is (vendor id, product id, unique id)
    pub bus: [u64; 5],
    pub event_version: u64,
    pub match_count: u64,
}

impl EventHeader {
    pub fn usb_unique_id(&self) -> u64 {
        self.bus[2]
    }

    pub fn set_usb_unique_id(&mut self, id: u64) {
        self.bus[2] = id;
    }
}

impl Wire for EventHeader {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.handle)?;
        a.word(&mut self.action)?;
        a.word(&mut self.status)?;
        a.word(&mut self.event_id)?;
        a.word(&mut self.card_type)?;
        a.word(&mut self.kernel_plugin)?;
        a.word(&mut self.options)?;
        for w in self.bus.iter_mut() {
            a.word(w)?;
        }
        a.word(&mut self.event_version)?;
        a.word(&mut self.match_count)
    }
}

/// EVENT_REGISTER / EVENT_PULL / EVENT_UNREGISTER payload
///
/// The C structure declares a one-element match table and callers append
/// more, so the payload always has room for entry 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub header: EventHeader,
    pub tables: Vec<MatchEntry>,
}

impl Event {
    /// Offset of the match table array (directly after `match_count`)
    pub fn tables_offset(word: WordSize) -> usize {
        12 * word.bytes()
    }

    /// Smallest payload: the header plus one match entry, padded
    pub fn min_size(word: WordSize) -> usize {
        crate::layout::align_up(
            Self::tables_offset(word) + MatchEntry::wire_size(word),
            word.bytes(),
        )
    }

    /// Decode the header and every declared match entry that fits in `buf`
    pub fn decode(buf: &[u8], word: WordSize) -> Result<Self> {
        let header = EventHeader::decode(buf, word)?;
        let offset = Self::tables_offset(word);
        let stride = MatchEntry::wire_size(word);
        let room = buf.len().saturating_sub(offset) / stride;
        let count = (header.match_count as usize).max(1).min(room);
        let tables = decode_array(buf, offset, count, word)?;
        Ok(Self { header, tables })
    }

    pub fn encode(&self, buf: &mut [u8], word: WordSize) -> Result<()> {
        self.header.encode(buf, word)?;
        encode_array(&self.tables, buf, Self::tables_offset(word), word)
    }

    /// Entries the caller declared, in order
    pub fn declared_tables(&self) -> &[MatchEntry] {
        let count = (self.header.match_count as usize).min(self.tables.len());
        &self.tables[..count]
    }
}

/// INT_ENABLE / INT_DISABLE / INT_WAIT payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interrupt {
    pub handle: u64,
    pub options: u64,
    pub commands: u64,
    pub command_count: u64,
    pub enable_ok: u64,
    pub counter: u64,
    pub lost: u64,
    pub stopped: u64,
}

impl Wire for Interrupt {
    fn fields<A: FieldAccess>(&mut self, a: &mut A) -> Result<()> {
        a.word(&mut self.handle)?;
        a.word(&mut self.options)?;
        a.word(&mut self.commands)?;
        a.word(&mut self.command_count)?;
        a.word(&mut self.enable_ok)?;
        a.word(&mut self.counter)?;
        a.word(&mut self.lost)?;
        a.word(&mut self.stopped)
    }
}
