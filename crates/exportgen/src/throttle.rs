use core::{
    num::NonZeroU64,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use pin_project_lite::pin_project;
use std::{future::Future, io};
use tokio::{
    io::AsyncWrite,
    time::{Instant, Sleep, sleep_until},
};

/// Upper bound on the bytes admitted by a single write.
pub const MAX_QUANTUM: u64 = 256 * 1024;

/// A quantum holds this fraction of a second worth of bytes.
const QUANTA_PER_SEC: u64 = 20;

pin_project! {
    /// An [`AsyncWrite`] pass-through that caps the average output rate.
    ///
    /// Each write admits at most one quantum (1/20 s worth of bytes, at most
    /// [`MAX_QUANTUM`]) and completes no earlier than the instant at which
    /// everything sent so far, this quantum included, fits under the rate.
    /// Waiting happens on a timer inside `poll_write`, so the producer is held
    /// back instead of bytes being queued.
    ///
    /// The schedule starts at the first write. Credit earned while the
    /// downstream sink was stalled is capped at one quantum: beyond that the
    /// schedule restarts from the current instant.
    ///
    /// The timer makes this type `!Unpin`; pin it (for example with
    /// [`Box::pin`]) before handing it to code that needs `Unpin`.
    #[derive(Debug)]
    pub struct Throttle<W> {
        #[pin]
        inner: W,
        rate: NonZeroU64,
        quantum: usize,
        anchor: Option<Instant>,
        sent: u64,
        admitted: Option<usize>,
        #[pin]
        sleep: Option<Sleep>,
    }
}

impl<W> Throttle<W> {
    pub fn new(inner: W, bytes_per_sec: NonZeroU64) -> Self {
        let quantum = (bytes_per_sec.get() / QUANTA_PER_SEC).clamp(1, MAX_QUANTUM) as usize;
        Self {
            inner,
            rate: bytes_per_sec,
            quantum,
            anchor: None,
            sent: 0,
            admitted: None,
            sleep: None,
        }
    }

    pub const fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

/// Time needed to send `bytes` at `rate`.
fn span(bytes: u64, rate: NonZeroU64) -> Duration {
    let nanos = u128::from(bytes) * 1_000_000_000 / u128::from(rate.get());
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn after(instant: Instant, by: Duration) -> Instant {
    instant
        .checked_add(by)
        .unwrap_or_else(|| instant + Duration::from_secs(86_400 * 365))
}

impl<W: AsyncWrite> AsyncWrite for Throttle<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        if buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }

        if this.admitted.is_none() {
            let len = buf.len().min(*this.quantum);
            let now = Instant::now();
            let anchor = *this.anchor.get_or_insert(now);

            let paid_until = after(anchor, span(*this.sent, *this.rate));
            let quantum_span = span(*this.quantum as u64, *this.rate);
            if now.saturating_duration_since(paid_until) > quantum_span {
                *this.anchor = Some(now);
                *this.sent = 0;
            }

            let anchor = this.anchor.unwrap_or(now);
            let release = after(anchor, span(*this.sent + len as u64, *this.rate));
            if release > now {
                this.sleep.set(Some(sleep_until(release)));
            }
            *this.admitted = Some(len);
        }

        if let Some(sleep) = this.sleep.as_mut().as_pin_mut() {
            ready!(sleep.poll(cx));
            this.sleep.set(None);
        }

        let len = buf.len().min(this.admitted.unwrap_or(*this.quantum));
        let written = ready!(this.inner.poll_write(cx, &buf[..len]));
        *this.admitted = None;
        let n = written?;
        *this.sent += n as u64;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
