use super::{Compression, format};
use crate::error::{Error, Result};
use flate2::{Crc, write::DeflateEncoder};
use std::io::Write;

/// Directory metadata of a closed entry. This is all that is retained per
/// entry once its data has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed: u64,
    pub uncompressed: u64,
    pub header_offset: u64,
    pub zip64: bool,
}

/// Bookkeeping for the entry currently being written.
pub(crate) struct ArchiveEntry {
    pub(crate) name: String,
    pub(crate) flags: u16,
    pub(crate) zip64: bool,
    pub(crate) header_offset: u64,
    method: u16,
    declared_size: Option<u64>,
    /// CRC already written to the local header, if the header is complete.
    header_crc: Option<u32>,
    crc: Crc,
    uncompressed: u64,
    compressed: u64,
    encoder: Option<DeflateEncoder<Vec<u8>>>,
}

impl ArchiveEntry {
    pub(crate) fn new(
        name: String,
        flags: u16,
        header_offset: u64,
        declared_size: Option<u64>,
        header_crc: Option<u32>,
        compression: Compression,
    ) -> Self {
        // Unknown sizes may grow past 4 GiB, so they get the wide layout.
        let zip64 = declared_size.is_none_or(|s| s >= format::ZIP64_ENTRY_THRESHOLD);
        let method = compression.method();
        let encoder = match compression {
            Compression::Stored => None,
            Compression::Deflate { level } => Some(DeflateEncoder::new(
                Vec::new(),
                flate2::Compression::new(level),
            )),
        };
        Self {
            name,
            flags,
            zip64,
            header_offset,
            method,
            declared_size,
            header_crc,
            crc: Crc::new(),
            uncompressed: 0,
            compressed: 0,
            encoder,
        }
    }

    pub(crate) const fn method(&self) -> u16 {
        self.method
    }

    /// Whether the local header already carries the final CRC and sizes.
    pub(crate) const fn header_complete(&self) -> bool {
        self.header_crc.is_some()
    }

    /// Accounts for `data` and returns the bytes to emit for it, if any.
    ///
    /// Stored entries pass the input through untouched. Deflated entries
    /// return whatever the encoder has completed so far, which may be empty.
    pub(crate) fn encode<'a>(&mut self, data: &'a [u8]) -> Result<EncodedData<'a>> {
        self.crc.update(data);
        self.uncompressed += data.len() as u64;

        if let Some(declared) = self.declared_size.filter(|d| self.uncompressed > *d) {
            return Err(Error::integrity(format!(
                "entry {} received {} bytes, declared {}",
                self.name, self.uncompressed, declared
            )));
        }

        let out = match self.encoder.as_mut() {
            None => EncodedData::Borrowed(data),
            Some(encoder) => {
                encoder.write_all(data)?;
                EncodedData::Owned(core::mem::take(encoder.get_mut()))
            }
        };
        self.compressed += out.len() as u64;
        Ok(out)
    }

    /// Flushes the encoder and returns its trailing output.
    pub(crate) fn finish_encoding(&mut self) -> Result<Vec<u8>> {
        let tail = match self.encoder.take() {
            None => Vec::new(),
            Some(encoder) => encoder.finish()?,
        };
        self.compressed += tail.len() as u64;
        Ok(tail)
    }

    /// Validates the final counters and produces the directory record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContainerIntegrity`] if fewer bytes than declared were
    /// written, if the content does not match the CRC already in the local
    /// header, or if a narrow entry overflowed its 32-bit fields.
    pub(crate) fn into_record(self) -> Result<EntryRecord> {
        if let Some(declared) = self.declared_size.filter(|d| *d != self.uncompressed) {
            return Err(Error::integrity(format!(
                "entry {} closed after {} bytes, declared {}",
                self.name, self.uncompressed, declared
            )));
        }

        let crc32 = self.crc.sum();
        if let Some(expected) = self.header_crc.filter(|c| *c != crc32) {
            return Err(Error::integrity(format!(
                "entry {} content CRC {:08x} differs from header CRC {:08x}",
                self.name, crc32, expected
            )));
        }

        if !self.zip64
            && (format::exceeds_u32(self.uncompressed) || format::exceeds_u32(self.compressed))
        {
            return Err(Error::integrity(format!(
                "entry {} outgrew 32-bit sizes without ZIP64",
                self.name
            )));
        }

        Ok(EntryRecord {
            method: self.method,
            name: self.name,
            flags: self.flags,
            crc32,
            compressed: self.compressed,
            uncompressed: self.uncompressed,
            header_offset: self.header_offset,
            zip64: self.zip64,
        })
    }
}

/// Output of [`ArchiveEntry::encode`].
pub(crate) enum EncodedData<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl EncodedData<'_> {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Borrowed(b) => b,
            Self::Owned(v) => v,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}
