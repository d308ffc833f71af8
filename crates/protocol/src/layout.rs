//! C struct layout and field codecs
//!
//! The emulated driver ABI is a set of C structures whose integer fields
//! are mostly `unsigned long`, so their layout depends on the word width of
//! the client process. Every structure in this crate describes its fields
//! once, through [`Wire::fields`], and the same description drives sizing,
//! decoding and in-place encoding.
//!
//! Fields follow C natural alignment: bytes align to 1, `u16` to 2, words
//! and pointers to the word width. A structure's size is rounded up to the
//! largest alignment among its fields. All integers are little-endian.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Width of `unsigned long` and pointers in the client ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum WordSize {
    /// ILP32 clients (4-byte words)
    Four,
    /// LP64 clients (8-byte words)
    Eight,
}

impl WordSize {
    /// Word size of the build target
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: WordSize = WordSize::Eight;
    /// Word size of the build target
    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: WordSize = WordSize::Four;

    /// Number of bytes in one word
    pub fn bytes(self) -> usize {
        match self {
            WordSize::Four => 4,
            WordSize::Eight => 8,
        }
    }

    /// Build from a byte count
    pub fn from_bytes(bytes: usize) -> Result<Self> {
        match bytes {
            4 => Ok(WordSize::Four),
            8 => Ok(WordSize::Eight),
            other => Err(ProtocolError::UnsupportedWordSize(other)),
        }
    }

    /// Truncate a value to what fits in one word
    pub fn truncate(self, value: u64) -> u64 {
        match self {
            WordSize::Four => value & 0xffff_ffff,
            WordSize::Eight => value,
        }
    }
}

impl Default for WordSize {
    fn default() -> Self {
        WordSize::NATIVE
    }
}

impl TryFrom<usize> for WordSize {
    type Error = ProtocolError;

    fn try_from(bytes: usize) -> Result<Self> {
        WordSize::from_bytes(bytes)
    }
}

impl From<WordSize> for usize {
    fn from(word: WordSize) -> usize {
        word.bytes()
    }
}

/// Round `offset` up to a multiple of `align`
pub fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

/// Running position inside a C structure
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    word: WordSize,
    offset: usize,
    max_align: usize,
}

impl Cursor {
    pub fn new(word: WordSize) -> Self {
        Self {
            word,
            offset: 0,
            max_align: 1,
        }
    }

    pub fn word_size(&self) -> WordSize {
        self.word
    }

    /// Reserve `size` bytes at the next `align` boundary, returning their offset
    pub fn place(&mut self, size: usize, align: usize) -> usize {
        self.offset = align_up(self.offset, align);
        self.max_align = self.max_align.max(align);
        let at = self.offset;
        self.offset += size;
        at
    }

    /// Offset just past the last placed field
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the structure including trailing padding
    pub fn size(&self) -> usize {
        align_up(self.offset, self.max_align)
    }
}

/// Visitor over the fields of a structure, in declaration order
pub trait FieldAccess {
    fn u8(&mut self, value: &mut u8) -> Result<()>;
    fn u16(&mut self, value: &mut u16) -> Result<()>;
    /// `unsigned long` or pointer
    fn word(&mut self, value: &mut u64) -> Result<()>;
    /// 8-byte union whose alignment follows the word width
    fn quad(&mut self, value: &mut u64) -> Result<()>;
    fn bytes(&mut self, value: &mut [u8]) -> Result<()>;
}

/// A fixed-layout ABI structure
pub trait Wire: Default + Clone {
    /// Visit every field in declaration order
    fn fields<A: FieldAccess>(&mut self, access: &mut A) -> Result<()>;

    /// Size of the structure, including trailing padding
    fn wire_size(word: WordSize) -> usize {
        let mut sizer = Sizer {
            cursor: Cursor::new(word),
        };
        // Sizing never touches a buffer, so it cannot fail.
        let _ = Self::default().fields(&mut sizer);
        sizer.cursor.size()
    }

    /// Decode from the start of `buf`
    fn decode(buf: &[u8], word: WordSize) -> Result<Self> {
        let needed = Self::wire_size(word);
        if buf.len() < needed {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let mut value = Self::default();
        value.fields(&mut Reader {
            buf,
            cursor: Cursor::new(word),
        })?;
        Ok(value)
    }

    /// Encode over the start of `buf`; bytes outside the fields are left alone
    fn encode(&self, buf: &mut [u8], word: WordSize) -> Result<()> {
        let needed = Self::wire_size(word);
        if buf.len() < needed {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let mut value = self.clone();
        value.fields(&mut Writer {
            buf,
            cursor: Cursor::new(word),
        })
    }
}

fn check(buf_len: usize, at: usize, size: usize) -> Result<()> {
    if at + size > buf_len {
        return Err(ProtocolError::BufferTooSmall {
            needed: at + size,
            available: buf_len,
        });
    }
    Ok(())
}

struct Sizer {
    cursor: Cursor,
}

impl FieldAccess for Sizer {
    fn u8(&mut self, _: &mut u8) -> Result<()> {
        self.cursor.place(1, 1);
        Ok(())
    }

    fn u16(&mut self, _: &mut u16) -> Result<()> {
        self.cursor.place(2, 2);
        Ok(())
    }

    fn word(&mut self, _: &mut u64) -> Result<()> {
        let w = self.cursor.word_size().bytes();
        self.cursor.place(w, w);
        Ok(())
    }

    fn quad(&mut self, _: &mut u64) -> Result<()> {
        let w = self.cursor.word_size().bytes();
        self.cursor.place(8, w);
        Ok(())
    }

    fn bytes(&mut self, value: &mut [u8]) -> Result<()> {
        self.cursor.place(value.len(), 1);
        Ok(())
    }
}

/// Reads fields out of a little-endian buffer
pub struct Reader<'a> {
    buf: &'a [u8],
    cursor: Cursor,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], word: WordSize) -> Self {
        Self {
            buf,
            cursor: Cursor::new(word),
        }
    }
}

impl FieldAccess for Reader<'_> {
    fn u8(&mut self, value: &mut u8) -> Result<()> {
        let at = self.cursor.place(1, 1);
        check(self.buf.len(), at, 1)?;
        *value = self.buf[at];
        Ok(())
    }

    fn u16(&mut self, value: &mut u16) -> Result<()> {
        let at = self.cursor.place(2, 2);
        check(self.buf.len(), at, 2)?;
        *value = LittleEndian::read_u16(&self.buf[at..]);
        Ok(())
    }

    fn word(&mut self, value: &mut u64) -> Result<()> {
        let w = self.cursor.word_size();
        let at = self.cursor.place(w.bytes(), w.bytes());
        check(self.buf.len(), at, w.bytes())?;
        *value = match w {
            WordSize::Four => u64::from(LittleEndian::read_u32(&self.buf[at..])),
            WordSize::Eight => LittleEndian::read_u64(&self.buf[at..]),
        };
        Ok(())
    }

    fn quad(&mut self, value: &mut u64) -> Result<()> {
        let at = self.cursor.place(8, self.cursor.word_size().bytes());
        check(self.buf.len(), at, 8)?;
        *value = LittleEndian::read_u64(&self.buf[at..]);
        Ok(())
    }

    fn bytes(&mut self, value: &mut [u8]) -> Result<()> {
        let at = self.cursor.place(value.len(), 1);
        check(self.buf.len(), at, value.len())?;
        value.copy_from_slice(&self.buf[at..at + value.len()]);
        Ok(())
    }
}

/// Writes fields into a little-endian buffer
pub struct Writer<'a> {
    buf: &'a mut [u8],
    cursor: Cursor,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8], word: WordSize) -> Self {
        Self {
            buf,
            cursor: Cursor::new(word),
        }
    }
}

impl FieldAccess for Writer<'_> {
    fn u8(&mut self, value: &mut u8) -> Result<()> {
        let at = self.cursor.place(1, 1);
        check(self.buf.len(), at, 1)?;
        self.buf[at] = *value;
        Ok(())
    }

    fn u16(&mut self, value: &mut u16) -> Result<()> {
        let at = self.cursor.place(2, 2);
        check(self.buf.len(), at, 2)?;
        LittleEndian::write_u16(&mut self.buf[at..], *value);
        Ok(())
    }

    fn word(&mut self, value: &mut u64) -> Result<()> {
        let w = self.cursor.word_size();
        let at = self.cursor.place(w.bytes(), w.bytes());
        check(self.buf.len(), at, w.bytes())?;
        match w {
            WordSize::Four => LittleEndian::write_u32(&mut self.buf[at..], *value as u32),
            WordSize::Eight => LittleEndian::write_u64(&mut self.buf[at..], *value),
        }
        Ok(())
    }

    fn quad(&mut self, value: &mut u64) -> Result<()> {
        let at = self.cursor.place(8, self.cursor.word_size().bytes());
        check(self.buf.len(), at, 8)?;
        LittleEndian::write_u64(&mut self.buf[at..], *value);
        Ok(())
    }

    fn bytes(&mut self, value: &mut [u8]) -> Result<()> {
        let at = self.cursor.place(value.len(), 1);
        check(self.buf.len(), at, value.len())?;
        self.buf[at..at + value.len()].copy_from_slice(value);
        Ok(())
    }
}

/// Decode `count` consecutive records starting at `offset`
pub fn decode_array<T: Wire>(buf: &[u8], offset: usize, count: usize, word: WordSize) -> Result<Vec<T>> {
    let stride = T::wire_size(word);
    let end = offset + stride * count;
    if buf.len() < end {
        return Err(ProtocolError::BufferTooSmall {
            needed: end,
            available: buf.len(),
        });
    }
    (0..count)
        .map(|i| T::decode(&buf[offset + i * stride..], word))
        .collect()
}

/// Encode records back-to-back starting at `offset`
pub fn encode_array<T: Wire>(items: &[T], buf: &mut [u8], offset: usize, word: WordSize) -> Result<()> {
    let stride = T::wire_size(word);
    for (i, item) in items.iter().enumerate() {
        let at = offset + i * stride;
        if at > buf.len() {
            return Err(ProtocolError::BufferTooSmall {
                needed: at + stride,
                available: buf.len(),
            });
        }
        item.encode(&mut buf[at..], word)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Mixed {
        a: u8,
        b: u16,
        c: u64,
        d: u8,
    }

    impl Wire for Mixed {
        fn fields<A: FieldAccess>(&mut self, access: &mut A) -> Result<()> {
            access.u8(&mut self.a)?;
            access.u16(&mut self.b)?;
            access.word(&mut self.c)?;
            access.u8(&mut self.d)
        }
    }

    #[test]
    fn test_natural_alignment() {
        // a@0 b@2 c@4|8 d@8|16, padded to the word
        assert_eq!(Mixed::wire_size(WordSize::Four), 12);
        assert_eq!(Mixed::wire_size(WordSize::Eight), 24);
    }

    #[test]
    fn test_decode_reads_little_endian() {
        let mut buf = [0u8; 12];
        buf[0] = 7;
        buf[2] = 0x34;
        buf[3] = 0x12;
        buf[4..8].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        buf[8] = 9;

        let value = Mixed::decode(&buf, WordSize::Four).unwrap();
        assert_eq!(
            value,
            Mixed {
                a: 7,
                b: 0x1234,
                c: 0xdead_beef,
                d: 9
            }
        );
    }

    #[test]
    fn test_encode_leaves_padding_untouched() {
        let mut buf = [0xaau8; 24];
        let value = Mixed {
            a: 1,
            b: 2,
            c: 3,
            d: 4,
        };
        value.encode(&mut buf, WordSize::Eight).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(buf[1], 0xaa);
        assert_eq!(&buf[8..16], &3u64.to_le_bytes());
        assert_eq!(buf[16], 4);
        assert_eq!(buf[17], 0xaa);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buf = [0u8; 10];
        let err = Mixed::decode(&buf, WordSize::Four).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BufferTooSmall {
                needed: 12,
                available: 10
            }
        );
    }

    #[test]
    fn test_word_size_from_bytes() {
        assert_eq!(WordSize::from_bytes(4).unwrap(), WordSize::Four);
        assert_eq!(WordSize::from_bytes(8).unwrap(), WordSize::Eight);
        assert!(WordSize::from_bytes(2).is_err());
        assert_eq!(WordSize::Four.truncate(0x1_0000_0002), 2);
    }

    #[test]
    fn test_array_stride() {
        let items = vec![
            Mixed {
                a: 1,
                ..Default::default()
            },
            Mixed {
                a: 2,
                ..Default::default()
            },
        ];
        let mut buf = vec![0u8; 4 + 24];
        encode_array(&items, &mut buf, 4, WordSize::Four).unwrap();
        assert_eq!(buf[4], 1);
        assert_eq!(buf[16], 2);

        let back: Vec<Mixed> = decode_array(&buf, 4, 2, WordSize::Four).unwrap();
        assert_eq!(back, items);
    }
}
