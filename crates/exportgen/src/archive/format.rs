//! ZIP record layouts (APPNOTE 6.3.x).
//!
//! All multi-byte fields are little-endian. Each function returns one fully
//! encoded record; callers are responsible for writing records in order and
//! tracking offsets.

use super::entry::EntryRecord;
use bytes::{BufMut, Bytes, BytesMut};

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;

pub const LOCAL_HEADER_LEN: u64 = 30;
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Sentinel marking a 32-bit field whose value lives in the ZIP64 extra.
pub const U32_SENTINEL: u32 = u32::MAX;
/// Sentinel marking a 16-bit count whose value lives in the ZIP64 record.
pub const U16_SENTINEL: u16 = u16::MAX;

/// Entries declared at or above this size are written as ZIP64 up front.
/// Leaves headroom below 4 GiB for deflate expansion on incompressible data.
pub const ZIP64_ENTRY_THRESHOLD: u64 = 0xF000_0000;

/// General purpose bit 3: sizes and CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose bit 11: the name is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
/// Upper byte 3 = Unix, lower byte = APPNOTE version 6.3.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;

/// Regular file, mode 0644, in the Unix half of the external attributes.
pub const EXTERNAL_ATTRIBUTES: u32 = 0o100_644 << 16;

/// 1980-01-01 00:00:00, the DOS epoch. A fixed stamp keeps output
/// reproducible.
pub const DOS_TIME: u16 = 0;
pub const DOS_DATE: u16 = (1 << 5) | 1;

/// Returns `true` if a 32-bit header field cannot hold `value`.
pub const fn exceeds_u32(value: u64) -> bool {
    value >= U32_SENTINEL as u64
}

/// Fields of a local file header as written when an entry is opened.
#[derive(Debug, Clone, Copy)]
pub struct LocalHeader<'a> {
    pub name: &'a [u8],
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed: u64,
    pub uncompressed: u64,
    pub zip64: bool,
}

impl LocalHeader<'_> {
    /// Offset of the CRC field from the start of the header.
    pub const CRC_OFFSET: u64 = 14;

    /// Offset of the ZIP64 size pair from the start of the header.
    pub fn zip64_sizes_offset(&self) -> u64 {
        LOCAL_HEADER_LEN + self.name.len() as u64 + 4
    }

    pub fn encode(&self) -> Bytes {
        let extra_len: u16 = if self.zip64 { 20 } else { 0 };
        let mut buf = BytesMut::with_capacity(30 + self.name.len() + usize::from(extra_len));

        buf.put_u32_le(LOCAL_HEADER_SIGNATURE);
        buf.put_u16_le(if self.zip64 {
            VERSION_ZIP64
        } else {
            VERSION_DEFAULT
        });
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.method);
        buf.put_u16_le(DOS_TIME);
        buf.put_u16_le(DOS_DATE);
        buf.put_u32_le(self.crc32);
        if self.zip64 {
            buf.put_u32_le(U32_SENTINEL);
            buf.put_u32_le(U32_SENTINEL);
        } else {
            buf.put_u32_le(self.compressed as u32);
            buf.put_u32_le(self.uncompressed as u32);
        }
        buf.put_u16_le(self.name.len() as u16);
        buf.put_u16_le(extra_len);
        buf.put_slice(self.name);
        if self.zip64 {
            // The local ZIP64 extra always carries both sizes.
            buf.put_u16_le(ZIP64_EXTRA_ID);
            buf.put_u16_le(16);
            buf.put_u64_le(self.uncompressed);
            buf.put_u64_le(self.compressed);
        }
        buf.freeze()
    }
}

/// Trailing record carrying the final CRC and sizes of a streamed entry.
pub fn data_descriptor(crc32: u32, compressed: u64, uncompressed: u64, zip64: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u32_le(DATA_DESCRIPTOR_SIGNATURE);
    buf.put_u32_le(crc32);
    if zip64 {
        buf.put_u64_le(compressed);
        buf.put_u64_le(uncompressed);
    } else {
        buf.put_u32_le(compressed as u32);
        buf.put_u32_le(uncompressed as u32);
    }
    buf.freeze()
}

/// Central directory file header for a closed entry.
pub fn central_header(record: &EntryRecord) -> Bytes {
    let wide_uncompressed = record.zip64 || exceeds_u32(record.uncompressed);
    let wide_compressed = record.zip64 || exceeds_u32(record.compressed);
    let wide_offset = exceeds_u32(record.header_offset);

    let mut extra = BytesMut::new();
    if wide_uncompressed || wide_compressed || wide_offset {
        let fields = [wide_uncompressed, wide_compressed, wide_offset]
            .iter()
            .filter(|w| **w)
            .count() as u16;
        extra.put_u16_le(ZIP64_EXTRA_ID);
        extra.put_u16_le(fields * 8);
        // Field order is fixed by the format: sizes first, then offset.
        if wide_uncompressed {
            extra.put_u64_le(record.uncompressed);
        }
        if wide_compressed {
            extra.put_u64_le(record.compressed);
        }
        if wide_offset {
            extra.put_u64_le(record.header_offset);
        }
    }

    let needed = if extra.is_empty() {
        VERSION_DEFAULT
    } else {
        VERSION_ZIP64
    };
    let name = record.name.as_bytes();

    let mut buf = BytesMut::with_capacity(46 + name.len() + extra.len());
    buf.put_u32_le(CENTRAL_HEADER_SIGNATURE);
    buf.put_u16_le(VERSION_MADE_BY);
    buf.put_u16_le(needed);
    buf.put_u16_le(record.flags);
    buf.put_u16_le(record.method);
    buf.put_u16_le(DOS_TIME);
    buf.put_u16_le(DOS_DATE);
    buf.put_u32_le(record.crc32);
    buf.put_u32_le(narrow(record.compressed, wide_compressed));
    buf.put_u32_le(narrow(record.uncompressed, wide_uncompressed));
    buf.put_u16_le(name.len() as u16);
    buf.put_u16_le(extra.len() as u16);
    buf.put_u16_le(0); // comment length
    buf.put_u16_le(0); // disk number start
    buf.put_u16_le(0); // internal attributes
    buf.put_u32_le(EXTERNAL_ATTRIBUTES);
    buf.put_u32_le(narrow(record.header_offset, wide_offset));
    buf.put_slice(name);
    buf.put_slice(&extra);
    buf.freeze()
}

const fn narrow(value: u64, wide: bool) -> u32 {
    if wide { U32_SENTINEL } else { value as u32 }
}

/// Location and extent of the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryBounds {
    pub entries: u64,
    pub size: u64,
    pub offset: u64,
}

impl DirectoryBounds {
    /// Whether the classic end record is too narrow for these values.
    pub const fn needs_zip64(&self) -> bool {
        self.entries >= U16_SENTINEL as u64 || exceeds_u32(self.size) || exceeds_u32(self.offset)
    }
}

/// ZIP64 end of central directory record.
pub fn zip64_end_of_central_directory(bounds: &DirectoryBounds) -> Bytes {
    let mut buf = BytesMut::with_capacity(56);
    buf.put_u32_le(ZIP64_EOCD_SIGNATURE);
    buf.put_u64_le(44); // size of the remaining record
    buf.put_u16_le(VERSION_MADE_BY);
    buf.put_u16_le(VERSION_ZIP64);
    buf.put_u32_le(0); // this disk
    buf.put_u32_le(0); // disk with the directory
    buf.put_u64_le(bounds.entries);
    buf.put_u64_le(bounds.entries);
    buf.put_u64_le(bounds.size);
    buf.put_u64_le(bounds.offset);
    buf.freeze()
}

/// Locator pointing at the ZIP64 end record.
pub fn zip64_locator(zip64_eocd_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u32_le(ZIP64_LOCATOR_SIGNATURE);
    buf.put_u32_le(0);
    buf.put_u64_le(zip64_eocd_offset);
    buf.put_u32_le(1);
    buf.freeze()
}

/// Classic end of central directory record. Overflowing values are written
/// as sentinels; the ZIP64 record must then precede it.
pub fn end_of_central_directory(bounds: &DirectoryBounds) -> Bytes {
    let entries = if bounds.entries >= U16_SENTINEL as u64 {
        U16_SENTINEL
    } else {
        bounds.entries as u16
    };

    let mut buf = BytesMut::with_capacity(22);
    buf.put_u32_le(EOCD_SIGNATURE);
    buf.put_u16_le(0);
    buf.put_u16_le(0);
    buf.put_u16_le(entries);
    buf.put_u16_le(entries);
    buf.put_u32_le(narrow(bounds.size, exceeds_u32(bounds.size)));
    buf.put_u32_le(narrow(bounds.offset, exceeds_u32(bounds.offset)));
    buf.put_u16_le(0); // comment length
    buf.freeze()
}
