//! Streaming ZIP assembly.
//!
//! [`ArchiveWriter`] turns an ordered sequence of named entries into one ZIP
//! byte stream whose entry sizes are only discovered while the entries are
//! consumed. The [`Framing`] parameter decides how those late sizes reach the
//! output; [`Streaming`] is the mode for network sinks.

mod entry;
pub mod format;
mod framing;
#[cfg(test)]
mod tests;
mod writer;

pub use entry::EntryRecord;
pub use framing::{Framing, Seekable, Streaming};
pub use writer::{ArchiveSummary, ArchiveWriter};

/// Entry compression. Speed matters more than ratio here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Method 0: content is copied verbatim, so the archive is about as large
    /// as the requested size.
    #[default]
    Stored,
    /// Method 8: raw deflate at the given level (1..=9).
    Deflate { level: u32 },
}

impl Compression {
    pub const FAST: Self = Self::Deflate { level: 1 };

    /// Maps a numeric level to a mode: `0` is stored, anything above `9` is
    /// clamped to `9`.
    pub const fn from_level(level: u32) -> Self {
        match level {
            0 => Self::Stored,
            1..=9 => Self::Deflate { level },
            _ => Self::Deflate { level: 9 },
        }
    }

    /// ZIP method identifier written to the headers.
    pub const fn method(&self) -> u16 {
        match self {
            Self::Stored => format::METHOD_STORED,
            Self::Deflate { .. } => format::METHOD_DEFLATED,
        }
    }
}
