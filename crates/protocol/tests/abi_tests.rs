//! ABI layout tests
//!
//! Pins the byte layout of every payload structure for both client word
//! widths, and checks that hand-assembled C-style buffers decode to the
//! expected field values.
//!
//! Run with: `cargo test -p protocol --test abi_tests`

use protocol::{
    CMD_WRITE_BYTE, CardRegister, Event, Header, Interrupt, MAGIC, MatchEntry, PortTransfer,
    UsbGetDeviceData, UsbSetInterface, UsbTransfer, VersionInfo, Wire, WordSize,
};

fn put_word(buf: &mut [u8], index: usize, word: WordSize, value: u64) {
    let w = word.bytes();
    let at = index * w;
    buf[at..at + w].copy_from_slice(&value.to_le_bytes()[..w]);
}

// ============================================================================
// Structure sizes
// ============================================================================

#[test]
fn test_payload_sizes_lp64() {
    let w = WordSize::Eight;
    assert_eq!(Header::wire_size(w), 24);
    assert_eq!(VersionInfo::wire_size(w), 136);
    assert_eq!(PortTransfer::wire_size(w), 48);
    assert_eq!(CardRegister::wire_size(w), 1768);
    assert_eq!(UsbTransfer::wire_size(w), 72);
    assert_eq!(UsbSetInterface::wire_size(w), 32);
    assert_eq!(UsbGetDeviceData::wire_size(w), 32);
    assert_eq!(Interrupt::wire_size(w), 64);
    assert_eq!(Event::min_size(w), 112);
}

#[test]
fn test_payload_sizes_ilp32() {
    let w = WordSize::Four;
    assert_eq!(Header::wire_size(w), 12);
    assert_eq!(VersionInfo::wire_size(w), 132);
    assert_eq!(PortTransfer::wire_size(w), 28);
    assert_eq!(CardRegister::wire_size(w), 948);
    assert_eq!(UsbTransfer::wire_size(w), 40);
    assert_eq!(Interrupt::wire_size(w), 32);
    assert_eq!(Event::min_size(w), 60);
}

// ============================================================================
// Decoding hand-built buffers
// ============================================================================

#[test]
fn test_header_decoding() {
    for word in [WordSize::Four, WordSize::Eight] {
        let mut buf = vec![0u8; Header::wire_size(word)];
        put_word(&mut buf, 0, word, MAGIC);
        put_word(&mut buf, 1, word, 0x8000);
        put_word(&mut buf, 2, word, 48);

        let header = Header::decode(&buf, word).unwrap();
        assert!(header.is_valid());
        assert_eq!(header.data, 0x8000);
        assert_eq!(header.size, 48);
    }
}

#[test]
fn test_port_transfer_data_union_lp64() {
    let w = WordSize::Eight;
    let mut buf = vec![0u8; PortTransfer::wire_size(w)];
    put_word(&mut buf, 0, w, 0x378);
    put_word(&mut buf, 1, w, CMD_WRITE_BYTE);
    buf[40] = 0xa5;

    let tr = PortTransfer::decode(&buf, w).unwrap();
    assert_eq!(tr.port, 0x378);
    assert_eq!(tr.command, CMD_WRITE_BYTE);
    assert_eq!(tr.byte(), 0xa5);
}

#[test]
fn test_port_transfer_data_union_ilp32() {
    let w = WordSize::Four;
    let mut buf = vec![0u8; PortTransfer::wire_size(w)];
    buf[20] = 0x3c;
    let tr = PortTransfer::decode(&buf, w).unwrap();
    assert_eq!(tr.byte(), 0x3c);
}

#[test]
fn test_card_register_handle_offset() {
    let w = WordSize::Eight;
    let mut card = CardRegister::with_ports(0x378, Some(0x778));
    card.card_handle = 7;
    let mut buf = vec![0u8; CardRegister::wire_size(w)];
    card.encode(&mut buf, w).unwrap();

    // dwItems, then item 0 union starts after four words
    assert_eq!(&buf[0..8], &2u64.to_le_bytes());
    assert_eq!(&buf[8 + 32..8 + 40], &0x378u64.to_le_bytes());
    // hCard follows the 20 items and fCheckLockOnly
    let handle_at = 8 + 20 * 80 + 8;
    assert_eq!(&buf[handle_at..handle_at + 8], &7u64.to_le_bytes());

    let back = CardRegister::decode(&buf, w).unwrap();
    assert_eq!(back.auxiliary_base(), Some(0x778));
}

#[test]
fn test_usb_transfer_setup_offset() {
    let w = WordSize::Eight;
    let mut buf = vec![0u8; UsbTransfer::wire_size(w)];
    put_word(&mut buf, 1, w, 0x82);
    put_word(&mut buf, 2, w, 1);
    buf[56..64].copy_from_slice(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
    put_word(&mut buf, 8, w, 1000);

    let ut = UsbTransfer::decode(&buf, w).unwrap();
    assert_eq!(ut.pipe, 0x82);
    assert!(ut.is_read());
    assert_eq!(ut.timeout, 1000);
    assert_eq!(ut.setup_packet().length, 18);
}

#[test]
fn test_event_match_tables() {
    let w = WordSize::Four;
    let mut event = Event::default();
    event.header.match_count = 2;
    event.tables = vec![
        MatchEntry {
            vendor_id: 0x03fd,
            product_id: 0x0008,
            ..Default::default()
        },
        MatchEntry {
            vendor_id: 0x03fd,
            product_id: 0x000d,
            interface_subclass: 0xff,
            ..Default::default()
        },
    ];
    let mut buf = vec![0u8; Event::tables_offset(w) + 2 * MatchEntry::wire_size(w)];
    event.encode(&mut buf, w).unwrap();

    // the first entry sits right after dwNumMatchTables
    assert_eq!(&buf[48..50], &0x03fdu16.to_le_bytes());
    assert_eq!(&buf[58 + 2..58 + 4], &0x000du16.to_le_bytes());

    let back = Event::decode(&buf, w).unwrap();
    assert_eq!(back.declared_tables(), event.tables.as_slice());
}

#[test]
fn test_event_declared_count_larger_than_buffer() {
    let w = WordSize::Eight;
    let mut buf = vec![0u8; Event::min_size(w)];
    put_word(&mut buf, 11, w, 5);
    let event = Event::decode(&buf, w).unwrap();
    assert_eq!(event.header.match_count, 5);
    assert_eq!(event.tables.len(), 1);
    assert_eq!(event.declared_tables().len(), 1);
}

#[test]
fn test_encode_preserves_trailing_bytes() {
    let w = WordSize::Eight;
    let mut buf = vec![0xeeu8; Interrupt::wire_size(w) + 4];
    Interrupt::default().encode(&mut buf, w).unwrap();
    assert!(buf[..64].iter().all(|&b| b == 0));
    assert_eq!(&buf[64..], &[0xee; 4]);
}
