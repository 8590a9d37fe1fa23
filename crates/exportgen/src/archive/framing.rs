//! How an entry's final CRC and sizes reach the output.
//!
//! Unless they were computed up front, sizes are only known once an entry's
//! source is exhausted, after its local header has already been written. [`Streaming`] appends a data descriptor
//! and works on any append-only sink. [`Seekable`] rewrites the header fields
//! in place and needs a sink that supports seeking.

use super::{
    entry::EntryRecord,
    format::{self, LocalHeader},
};
use core::future::Future;
use std::io::{self, SeekFrom};
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

mod private {
    pub trait Sealed {}
    impl Sealed for super::Streaming {}
    impl Sealed for super::Seekable {}
}

/// Strategy used to resolve deferred entry sizes on sink `W`.
pub trait Framing<W>: private::Sealed {
    /// General purpose flags set on entries whose header is provisional.
    const FLAGS: u16;

    /// Completes `record` on the sink. `position` is the current end of the
    /// output. Returns the number of bytes appended at the end. Not called
    /// for entries written with a complete local header.
    fn close_entry(
        sink: &mut W,
        position: u64,
        record: &EntryRecord,
    ) -> impl Future<Output = io::Result<u64>> + Send;
}

/// Trailing data descriptor after each entry. Required for network sinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Streaming;

/// In-place header patching. The sink must start at offset 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Seekable;

impl<W> Framing<W> for Streaming
where
    W: AsyncWrite + Unpin + Send,
{
    const FLAGS: u16 = format::FLAG_DATA_DESCRIPTOR;

    async fn close_entry(sink: &mut W, _position: u64, record: &EntryRecord) -> io::Result<u64> {
        let descriptor = format::data_descriptor(
            record.crc32,
            record.compressed,
            record.uncompressed,
            record.zip64,
        );
        sink.write_all(&descriptor).await?;
        Ok(descriptor.len() as u64)
    }
}

impl<W> Framing<W> for Seekable
where
    W: AsyncWrite + AsyncSeek + Unpin + Send,
{
    const FLAGS: u16 = 0;

    async fn close_entry(sink: &mut W, position: u64, record: &EntryRecord) -> io::Result<u64> {
        sink.flush().await?;
        sink.seek(SeekFrom::Start(record.header_offset + LocalHeader::CRC_OFFSET))
            .await?;
        sink.write_u32_le(record.crc32).await?;

        if record.zip64 {
            let header = LocalHeader {
                name: record.name.as_bytes(),
                flags: record.flags,
                method: record.method,
                crc32: record.crc32,
                compressed: record.compressed,
                uncompressed: record.uncompressed,
                zip64: true,
            };
            sink.seek(SeekFrom::Start(
                record.header_offset + header.zip64_sizes_offset(),
            ))
            .await?;
            sink.write_u64_le(record.uncompressed).await?;
            sink.write_u64_le(record.compressed).await?;
        } else {
            sink.write_u32_le(record.compressed as u32).await?;
            sink.write_u32_le(record.uncompressed as u32).await?;
        }

        sink.flush().await?;
        sink.seek(SeekFrom::Start(position)).await?;
        Ok(0)
    }
}
