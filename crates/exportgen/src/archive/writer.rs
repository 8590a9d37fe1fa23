use super::{
    Compression,
    entry::{ArchiveEntry, EntryRecord},
    format::{self, DirectoryBounds, LocalHeader},
    framing::{Framing, Seekable, Streaming},
};
use crate::{
    error::{Error, Result},
    source::Chunk,
};
use core::marker::PhantomData;
use flate2::Crc;
use tokio::io::{AsyncSeek, AsyncWrite, AsyncWriteExt};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Totals reported once the archive is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: u64,
    /// Bytes of container written, framing included.
    pub bytes_written: u64,
    /// Uncompressed entry content.
    pub content_bytes: u64,
}

enum State {
    Idle,
    Writing(ArchiveEntry),
    Done,
    /// A write failed or an invariant broke; nothing more may be written.
    Failed,
}

impl State {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Writing(_) => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Serializes named entries into a single ZIP stream.
///
/// Entries are written in the order they are opened. Only the entry being
/// written and one [`EntryRecord`] per closed entry are held in memory, so
/// the footprint does not depend on how much content passes through.
///
/// ```text
/// Idle --open_entry/append--> Writing --close_entry--> Idle --finish--> Done
/// ```
///
/// Any sink error or invariant violation moves the writer to a failed state
/// in which [`ArchiveWriter::finish`] refuses to emit a central directory, so
/// a broken archive never looks complete.
pub struct ArchiveWriter<W, F = Streaming> {
    sink: W,
    position: u64,
    compression: Compression,
    state: State,
    directory: Vec<EntryRecord>,
    content_bytes: u64,
    _framing: PhantomData<F>,
}

impl<W> ArchiveWriter<W, Streaming>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a writer for an append-only sink (data descriptor framing).
    pub fn new(sink: W, compression: Compression) -> Self {
        Self::with_framing(sink, compression)
    }
}

impl<W> ArchiveWriter<W, Seekable>
where
    W: AsyncWrite + AsyncSeek + Unpin + Send,
{
    /// Creates a writer that patches local headers in place. `sink` must be
    /// positioned at offset 0.
    pub fn seekable(sink: W, compression: Compression) -> Self {
        Self::with_framing(sink, compression)
    }
}

impl<W, F> ArchiveWriter<W, F>
where
    W: AsyncWrite + Unpin + Send,
    F: Framing<W>,
{
    fn with_framing(sink: W, compression: Compression) -> Self {
        Self {
            sink,
            position: 0,
            compression,
            state: State::Idle,
            directory: Vec::new(),
            content_bytes: 0,
            _framing: PhantomData,
        }
    }

    /// Bytes written to the sink so far.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Records of the entries closed so far.
    pub fn entries(&self) -> &[EntryRecord] {
        &self.directory
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Opens a new entry and writes its provisional local header.
    ///
    /// `declared_size`, when known, is checked against the data written and
    /// decides whether the entry needs ZIP64 fields. The CRC and sizes are
    /// resolved by the framing strategy when the entry is closed.
    ///
    /// # Errors
    ///
    /// [`Error::ContainerIntegrity`] if another entry is open or the archive
    /// is finished, [`Error::GenerationAbort`] if the sink fails.
    pub async fn open_entry(&mut self, name: &str, declared_size: Option<u64>) -> Result<()> {
        self.begin_entry(name, declared_size, None).await
    }

    /// Writes a local header. With `header_crc` set the entry must be stored
    /// with a declared size: the header is complete and needs no data
    /// descriptor.
    async fn begin_entry(
        &mut self,
        name: &str,
        declared_size: Option<u64>,
        header_crc: Option<u32>,
    ) -> Result<()> {
        match self.state {
            State::Idle => {}
            ref other => return Err(self.misuse("open an entry", other.name())),
        }

        let name_len_ok = u16::try_from(name.len()).is_ok();
        if name.is_empty() || !name_len_ok {
            return Err(Error::integrity(format!(
                "entry name must be 1..=65535 bytes, got {}",
                name.len()
            )));
        }

        let mut flags = F::FLAGS;
        if header_crc.is_some() {
            flags &= !format::FLAG_DATA_DESCRIPTOR;
        }
        if !name.is_ascii() {
            flags |= format::FLAG_UTF8;
        }

        let size = header_crc.and(declared_size).unwrap_or(0);
        let entry = ArchiveEntry::new(
            name.to_owned(),
            flags,
            self.position,
            declared_size,
            header_crc,
            self.compression,
        );
        let header = LocalHeader {
            name: name.as_bytes(),
            flags,
            method: entry.method(),
            crc32: header_crc.unwrap_or(0),
            compressed: size,
            uncompressed: size,
            zip64: entry.zip64,
        }
        .encode();

        self.state = State::Writing(entry);
        self.emit(&header).await
    }

    /// Writes one chunk of content to the open entry.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let State::Writing(entry) = &mut self.state else {
            let state = self.state.name();
            return Err(self.misuse("write data", state));
        };

        let encoded = match entry.encode(data) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };
        let result = write_counted(&mut self.sink, &mut self.position, encoded.as_slice()).await;
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    /// Completes the open entry: flushes compression, resolves deferred sizes
    /// through the framing strategy and keeps the directory record.
    pub async fn close_entry(&mut self) -> Result<&EntryRecord> {
        let mut entry = match core::mem::replace(&mut self.state, State::Failed) {
            State::Writing(entry) => entry,
            other => {
                let state = other.name();
                self.state = other;
                return Err(self.misuse("close an entry", state));
            }
        };

        let tail = entry.finish_encoding()?;
        write_counted(&mut self.sink, &mut self.position, &tail).await?;

        let header_complete = entry.header_complete();
        let record = entry.into_record()?;
        if !header_complete {
            let appended = F::close_entry(&mut self.sink, self.position, &record).await?;
            self.position += appended;
        }

        self.content_bytes += record.uncompressed;
        self.directory.push(record);
        self.state = State::Idle;
        Ok(&self.directory[self.directory.len() - 1])
    }

    /// Opens an entry, drains `chunks` into it and closes it.
    ///
    /// A stored entry with a declared size gets a complete local header: the
    /// CRC is taken from a first pass over a clone of `chunks`, and no data
    /// descriptor follows the data. Such entries can be extracted by readers
    /// that never see the central directory.
    ///
    /// The first error aborts the whole archive; the source is dropped with
    /// any unread chunks.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(name = name)))]
    pub async fn append<I>(
        &mut self,
        name: &str,
        declared_size: Option<u64>,
        chunks: I,
    ) -> Result<&EntryRecord>
    where
        I: IntoIterator<Item = Chunk> + Clone,
    {
        let header_crc = match (self.compression, declared_size) {
            (Compression::Stored, Some(_)) => Some(content_crc(chunks.clone())),
            _ => None,
        };
        self.begin_entry(name, declared_size, header_crc).await?;
        for chunk in chunks {
            self.write_chunk(&chunk.bytes).await?;
        }
        self.close_entry().await
    }

    /// Writes the central directory and end records, then flushes the sink.
    ///
    /// # Errors
    ///
    /// [`Error::ContainerIntegrity`] if an entry is still open, the archive is
    /// already finished, or an earlier failure poisoned the writer.
    pub async fn finish(&mut self) -> Result<ArchiveSummary> {
        match self.state {
            State::Idle => {}
            ref other => return Err(self.misuse("finish the archive", other.name())),
        }
        self.state = State::Failed;

        let offset = self.position;
        for record in &self.directory {
            let header = format::central_header(record);
            write_counted(&mut self.sink, &mut self.position, &header).await?;
        }

        let bounds = DirectoryBounds {
            entries: self.directory.len() as u64,
            size: self.position - offset,
            offset,
        };
        if bounds.needs_zip64() {
            let zip64_offset = self.position;
            let record = format::zip64_end_of_central_directory(&bounds);
            write_counted(&mut self.sink, &mut self.position, &record).await?;
            let locator = format::zip64_locator(zip64_offset);
            write_counted(&mut self.sink, &mut self.position, &locator).await?;
        }
        let end = format::end_of_central_directory(&bounds);
        write_counted(&mut self.sink, &mut self.position, &end).await?;
        self.sink.flush().await?;
        self.sink.shutdown().await?;

        self.state = State::Done;
        Ok(ArchiveSummary {
            entries: bounds.entries,
            bytes_written: self.position,
            content_bytes: self.content_bytes,
        })
    }

    async fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        let result = write_counted(&mut self.sink, &mut self.position, bytes).await;
        if result.is_err() {
            self.state = State::Failed;
        }
        result
    }

    fn misuse(&self, action: &str, state: &str) -> Error {
        Error::integrity(format!(
            "cannot {action} while the archive is {state} (at byte {})",
            self.position
        ))
    }
}

fn content_crc<I>(chunks: I) -> u32
where
    I: IntoIterator<Item = Chunk>,
{
    let mut crc = Crc::new();
    for chunk in chunks {
        crc.update(&chunk.bytes);
    }
    crc.sum()
}

async fn write_counted<W>(sink: &mut W, position: &mut u64, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if bytes.is_empty() {
        return Ok(());
    }
    sink.write_all(bytes).await?;
    *position += bytes.len() as u64;
    Ok(())
}
