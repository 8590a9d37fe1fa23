use crate::server::{
    service::state::InflightGuard,
    telemetry::{add_bytes_streamed, increment_stream_errors, record_stream_duration},
};
use axum::body::Body;
use bytes::Bytes;
use core::time::Duration;
use exportgen::{Error, ExportPlan, PipelineOptions, write_export};
use futures::{SinkExt, future};
use std::io;
use tokio::{io::AsyncWrite, sync::mpsc, time::Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::{
    io::{CopyToBytes, SinkWriter},
    sync::{CancellationToken, PollSender},
};
use tracing::Instrument;

/// How long a failed export may wait to push its error to a slow client.
const ERROR_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns the export pipeline for `plan` and returns the response body it
/// feeds.
///
/// The pipeline writes into a bounded channel of `buffer` messages; the body
/// drains it. A slow client therefore stalls the generator instead of growing
/// memory, and a client that disconnects closes the channel, which fails the
/// next write with [`io::ErrorKind::BrokenPipe`].
///
/// # Behavior
///
/// - The export stops with [`Error::Cancelled`] once `shutdown_token` fires.
/// - On any failure the body yields an error item, so the connection is
///   reset rather than ending as if the archive were complete.
/// - `guard` is held until the pipeline task ends.
pub fn stream_export(
    plan: ExportPlan,
    options: PipelineOptions,
    buffer: usize,
    shutdown_token: CancellationToken,
    guard: InflightGuard,
) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(buffer);
    let err_tx = tx.clone();
    let span = tracing::info_span!("export", export_id = plan.request().export_id());

    let fut = async move {
        let _guard = guard;
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => Err(Error::Cancelled),
            res = write_export(&plan, body_writer(tx), options) => res,
        };

        match result {
            Ok(summary) => {
                let elapsed = start.elapsed();
                record_stream_duration(elapsed.as_secs_f64() * 1000.0);
                add_bytes_streamed(summary.bytes_written);
                tracing::info!(
                    entries = summary.entries,
                    bytes = summary.bytes_written,
                    "Export completed in {:.2}s",
                    elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                increment_stream_errors();
                tracing::warn!("Export aborted: {e}");
                // The receiver is gone when the client disconnected.
                match tokio::time::timeout(
                    ERROR_SEND_TIMEOUT,
                    err_tx.send(Err(io::Error::other(e.to_string()))),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => tracing::debug!("Client already disconnected"),
                    Err(_) => tracing::debug!("Timed out forwarding error to client"),
                }
            }
        }
    };

    tokio::spawn(fut.instrument(span));

    Body::from_stream(ReceiverStream::new(rx))
}

/// Adapts the body channel into the `AsyncWrite` the archive writer expects.
///
/// Every write is copied into one message.
fn body_writer(tx: mpsc::Sender<io::Result<Bytes>>) -> impl AsyncWrite + Unpin + Send {
    let sink = PollSender::new(tx)
        .sink_map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        .with(|chunk: Bytes| future::ready(Ok::<io::Result<Bytes>, io::Error>(Ok(chunk))));
    SinkWriter::new(CopyToBytes::new(sink))
}
