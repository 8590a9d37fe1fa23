//! Synthetic, lazily generated ZIP exports.
//!
//! An [`ExportPlan`] partitions a validated [`GenerationRequest`] into
//! [`LogicalFile`]s. Each file's content comes from a [`ChunkSource`] that
//! generates at most [`CHUNK_SIZE`] bytes at a time, the [`ArchiveWriter`]
//! frames the entries as a ZIP stream, and an optional [`Throttle`] caps the
//! output rate. [`write_export`] runs the whole chain against any
//! [`tokio::io::AsyncWrite`] sink with memory that does not grow with the
//! requested size.

mod archive;
mod content;
mod error;
mod pipeline;
mod plan;
mod source;
mod throttle;

pub use crate::archive::*;
pub use crate::content::*;
pub use crate::error::*;
pub use crate::pipeline::*;
pub use crate::plan::*;
pub use crate::source::*;
pub use crate::throttle::*;
