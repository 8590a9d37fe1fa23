use super::{format::*, *};
use crate::{Error, source::ChunkSource};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use std::io::{self, Cursor};
use tokio::io::AsyncWrite;

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(b[at..at + 4].try_into().unwrap())
}

/// Accepts `capacity` bytes, then fails every write.
struct FailingSink {
    capacity: usize,
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.capacity == 0 {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        let n = buf.len().min(self.capacity);
        self.capacity -= n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn empty_archive_is_a_bare_end_record() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    let summary = writer.finish().await.unwrap();
    let out = writer.into_inner();

    assert_eq!(out.len(), 22);
    assert_eq!(u32_at(&out, 0), EOCD_SIGNATURE);
    assert_eq!(summary.entries, 0);
    assert_eq!(summary.bytes_written, 22);
}

#[tokio::test]
async fn sized_stored_entries_have_complete_local_headers() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    let record = writer
        .append("a.txt", Some(5), ChunkSource::new(0, 5))
        .await
        .unwrap()
        .clone();
    let summary = writer.finish().await.unwrap();
    let out = writer.into_inner();

    assert_eq!(u32_at(&out, 0), LOCAL_HEADER_SIGNATURE);
    assert_eq!(u16_at(&out, 6), 0);
    assert_eq!(record.flags, 0);
    assert_eq!(u32_at(&out, 14), record.crc32);
    assert_eq!(u32_at(&out, 18), 5);
    assert_eq!(u32_at(&out, 22), 5);

    let data_at = 30 + 5;
    assert_eq!(&out[data_at..data_at + 5], b"Chunk");
    // No descriptor: the central directory follows the data directly.
    assert_eq!(u32_at(&out, data_at + 5), CENTRAL_HEADER_SIGNATURE);

    assert_eq!(summary.entries, 1);
    assert_eq!(summary.content_bytes, 5);
    assert_eq!(summary.bytes_written, out.len() as u64);
}

#[tokio::test]
async fn open_entry_defers_sizes_to_a_descriptor() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.open_entry("a.txt", Some(5)).await.unwrap();
    for chunk in ChunkSource::new(0, 5) {
        writer.write_chunk(&chunk.bytes).await.unwrap();
    }
    let crc32 = writer.close_entry().await.unwrap().crc32;
    writer.finish().await.unwrap();
    let out = writer.into_inner();

    assert_eq!(u16_at(&out, 6), FLAG_DATA_DESCRIPTOR);
    assert_eq!(u32_at(&out, 14), 0);
    assert_eq!(u32_at(&out, 18), 0);

    let descriptor_at = 30 + 5 + 5;
    assert_eq!(u32_at(&out, descriptor_at), DATA_DESCRIPTOR_SIGNATURE);
    assert_eq!(u32_at(&out, descriptor_at + 4), crc32);
    assert_eq!(u32_at(&out, descriptor_at + 8), 5);
    assert_eq!(u32_at(&out, descriptor_at + 12), 5);
    assert_eq!(u32_at(&out, descriptor_at + 16), CENTRAL_HEADER_SIGNATURE);
}

#[tokio::test]
async fn deflate_entries_keep_the_descriptor() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::FAST);
    let record = writer
        .append("z", Some(1000), ChunkSource::new(0, 1000))
        .await
        .unwrap()
        .clone();
    let out = writer.into_inner();

    assert_eq!(record.flags, FLAG_DATA_DESCRIPTOR);
    assert_eq!(u16_at(&out, 6), FLAG_DATA_DESCRIPTOR);
    let descriptor_at = 30 + 1 + record.compressed as usize;
    assert_eq!(u32_at(&out, descriptor_at), DATA_DESCRIPTOR_SIGNATURE);
    assert_eq!(out.len(), descriptor_at + 16);
}

#[tokio::test]
async fn records_track_header_offsets() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.append("a", Some(3), ChunkSource::new(0, 3)).await.unwrap();
    writer.append("b", Some(4), ChunkSource::new(1, 4)).await.unwrap();
    writer.append("c", None, ChunkSource::new(2, 2)).await.unwrap();

    let records = writer.entries();
    assert_eq!(records[0].header_offset, 0);
    // header + data
    assert_eq!(records[1].header_offset, 31 + 3);
    assert_eq!(records[2].header_offset, records[1].header_offset + 31 + 4);
    // header + zip64 extra + data + 24 byte descriptor
    assert_eq!(writer.position(), records[2].header_offset + 31 + 20 + 2 + 24);
}

#[tokio::test]
async fn seekable_mode_patches_local_header() {
    let mut writer = ArchiveWriter::seekable(Cursor::new(Vec::new()), Compression::Stored);
    writer.open_entry("a.txt", Some(12)).await.unwrap();
    for chunk in ChunkSource::new(3, 12) {
        writer.write_chunk(&chunk.bytes).await.unwrap();
    }
    let record = writer.close_entry().await.unwrap().clone();
    writer.finish().await.unwrap();
    let out = writer.into_inner().into_inner();

    assert_eq!(u16_at(&out, 6), 0);
    assert_eq!(u32_at(&out, 14), record.crc32);
    assert_eq!(u32_at(&out, 18), 12);
    assert_eq!(u32_at(&out, 22), 12);
    // No descriptor: the central directory follows the data directly.
    assert_eq!(u32_at(&out, 35 + 12), CENTRAL_HEADER_SIGNATURE);
}

#[tokio::test]
async fn non_ascii_names_set_the_utf8_flag() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.append("données", Some(1), ChunkSource::new(0, 1)).await.unwrap();
    let flags = writer.entries()[0].flags;
    assert_eq!(flags, FLAG_UTF8);

    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.append("données", None, ChunkSource::new(0, 1)).await.unwrap();
    let flags = writer.entries()[0].flags;
    assert_eq!(flags, FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
}

#[tokio::test]
async fn unknown_size_entries_use_zip64() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.append("u", None, ChunkSource::new(0, 10)).await.unwrap();
    assert!(writer.entries()[0].zip64);
    writer.finish().await.unwrap();
    let out = writer.into_inner();

    assert_eq!(u16_at(&out, 4), VERSION_ZIP64);
    assert_eq!(u16_at(&out, 28), 20);
    // 30 + name + 20 byte extra + data, then a 24 byte descriptor.
    let descriptor_at = 30 + 1 + 20 + 10;
    assert_eq!(u32_at(&out, descriptor_at), DATA_DESCRIPTOR_SIGNATURE);
    assert_eq!(u32_at(&out, descriptor_at + 24), CENTRAL_HEADER_SIGNATURE);
}

#[tokio::test]
async fn write_without_open_entry_is_rejected() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    let err = writer.write_chunk(b"orphan").await.unwrap_err();
    assert!(matches!(err, Error::ContainerIntegrity { .. }));
    assert!(writer.into_inner().is_empty());
}

#[tokio::test]
async fn cannot_open_two_entries_at_once() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.open_entry("a", None).await.unwrap();
    let err = writer.open_entry("b", None).await.unwrap_err();
    assert!(matches!(err, Error::ContainerIntegrity { .. }));
}

#[tokio::test]
async fn finish_with_open_entry_is_rejected() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.open_entry("a", None).await.unwrap();
    assert!(matches!(
        writer.finish().await,
        Err(Error::ContainerIntegrity { .. })
    ));
}

#[tokio::test]
async fn done_is_terminal() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    writer.finish().await.unwrap();
    assert!(writer.open_entry("late", Some(1)).await.is_err());
    assert!(writer.finish().await.is_err());
}

#[tokio::test]
async fn size_mismatch_poisons_the_archive() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::Stored);
    let err = writer
        .append("short", Some(100), ChunkSource::new(0, 40))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContainerIntegrity { .. }));

    // No central directory may follow a broken entry.
    assert!(writer.finish().await.is_err());
    let out = writer.into_inner();
    // The header promised 100 bytes; only 40 followed.
    assert_eq!(u32_at(&out, 22), 100);
    assert_eq!(out.len(), 30 + 5 + 40);
    assert!(
        !out.windows(4)
            .any(|w| w == CENTRAL_HEADER_SIGNATURE.to_le_bytes())
    );
}

#[tokio::test]
async fn sink_failure_aborts_and_poisons() {
    let mut writer = ArchiveWriter::new(FailingSink { capacity: 100 }, Compression::Stored);
    let err = writer
        .append("a", Some(4096), ChunkSource::new(0, 4096))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationAbort(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert!(matches!(
        writer.finish().await,
        Err(Error::ContainerIntegrity { .. })
    ));
}

#[tokio::test]
async fn deflate_entries_record_compressed_size() {
    let mut writer = ArchiveWriter::new(Vec::new(), Compression::FAST);
    let record = writer
        .append("z", Some(200_000), ChunkSource::new(0, 200_000))
        .await
        .unwrap()
        .clone();
    assert_eq!(record.method, METHOD_DEFLATED);
    assert_eq!(record.uncompressed, 200_000);
    assert!(record.compressed < record.uncompressed / 10);
}

#[test]
fn compression_levels() {
    assert_eq!(Compression::from_level(0), Compression::Stored);
    assert_eq!(Compression::from_level(1), Compression::FAST);
    assert_eq!(
        Compression::from_level(42),
        Compression::Deflate { level: 9 }
    );
    assert_eq!(Compression::default().method(), METHOD_STORED);
}
