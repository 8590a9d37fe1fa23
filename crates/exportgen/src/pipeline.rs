//! Wires the stages of one export together.
//!
//! ```text
//! ExportPlan -> ChunkSource (per file) -> ArchiveWriter -> [Throttle] -> sink
//! ```
//!
//! Everything runs sequentially on the calling task. The sink's backpressure
//! (and the throttle's, when a rate is set) is the only thing pacing
//! generation, so a slow reader never causes content to pile up in memory.

use crate::{
    archive::{ArchiveSummary, ArchiveWriter, Compression},
    error::Result,
    plan::ExportPlan,
    source::ChunkSource,
    throttle::Throttle,
};
use core::num::NonZeroU64;
use tokio::io::AsyncWrite;

/// Tunables that do not change what the archive contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub compression: Compression,
}

/// Streams the archive described by `plan` into `sink`.
///
/// The sink is wrapped in a [`Throttle`] only when the request carries a
/// rate limit. The startup delay is not applied here; callers decide when the
/// response is committed.
///
/// # Errors
///
/// - [`Error::GenerationAbort`] if the sink fails, typically because the
///   client went away.
/// - [`Error::ContainerIntegrity`] if the writer detects an inconsistency.
///
/// In both cases the archive is left without a central directory.
///
/// [`Error::GenerationAbort`]: crate::Error::GenerationAbort
/// [`Error::ContainerIntegrity`]: crate::Error::ContainerIntegrity
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip_all,
        fields(export_id = plan.request().export_id(), files = plan.file_count())
    )
)]
pub async fn write_export<W>(
    plan: &ExportPlan,
    sink: W,
    options: PipelineOptions,
) -> Result<ArchiveSummary>
where
    W: AsyncWrite + Unpin + Send,
{
    match NonZeroU64::new(plan.request().rate_limit_bytes_per_sec()) {
        Some(rate) => assemble(plan, Box::pin(Throttle::new(sink, rate)), options).await,
        None => assemble(plan, sink, options).await,
    }
}

async fn assemble<W>(plan: &ExportPlan, sink: W, options: PipelineOptions) -> Result<ArchiveSummary>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = ArchiveWriter::new(sink, options.compression);
    for (n, file) in plan.files().iter().enumerate() {
        writer
            .append(
                &file.name,
                Some(file.target_size_bytes),
                ChunkSource::for_file(file),
            )
            .await?;
        report_progress(plan, n + 1, writer.position());
    }
    writer.finish().await
}

/// Logs every tenth of the files and the last one.
#[cfg(feature = "tracing")]
fn report_progress(plan: &ExportPlan, done: usize, position: u64) {
    let total = plan.file_count();
    let step = (total / 10).max(1);
    if done % step == 0 || done == total {
        tracing::info!(
            export_id = plan.request().export_id(),
            files = done,
            total,
            bytes = position,
            "Export progress {}%",
            done * 100 / total
        );
    }
}

#[cfg(not(feature = "tracing"))]
#[inline]
const fn report_progress(_plan: &ExportPlan, _done: usize, _position: u64) {}
