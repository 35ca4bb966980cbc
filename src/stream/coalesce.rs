//! Batch coalescing for slow consumers

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::types::Batch;

/// Extension trait to add coalescing to any stream of batches
pub trait CoalesceExt: Stream<Item = Batch> {
    /// Deliver at most one batch per interval
    ///
    /// Batches arriving within one interval are merged in arrival order, so
    /// every sample is delivered exactly once.
    fn coalesce(self, duration: Duration) -> Coalesce<Self>
    where
        Self: Sized,
    {
        Coalesce::new(self, duration)
    }
}

impl<T: Stream<Item = Batch>> CoalesceExt for T {}

pin_project! {
    /// A stream combinator that merges batches over a fixed interval
    pub struct Coalesce<S> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<Batch>,
        done: bool,
    }
}

impl<S> Coalesce<S> {
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Delay rather than burst after a slow consumer
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, done: false }
    }
}

impl<S: Stream<Item = Batch>> Stream for Coalesce<S> {
    type Item = Batch;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Batch>> {
        let mut this = self.project();

        // Drain everything available into the pending batch
        while !*this.done {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(batch)) => match this.pending.as_mut() {
                    Some(pending) => pending.merge(batch),
                    None => *this.pending = Some(batch),
                },
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if *this.done {
            return Poll::Ready(this.pending.take());
        }
        // Nothing buffered: the inner stream has registered the waker
        if this.pending.is_none() {
            return Poll::Pending;
        }

        ready!(this.interval.poll_tick(cx));
        Poll::Ready(this.pending.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn batch(sequence: u64, stamps: &[f64]) -> Batch {
        Batch::new(sequence, stamps.iter().map(|t| Sample::new(*t, vec![*t])).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn merges_within_interval_without_loss() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = UnboundedReceiverStream::new(rx).coalesce(Duration::from_millis(100));

        tx.send(batch(0, &[1.0])).unwrap();
        // The first tick is immediate
        assert_eq!(stream.next().await.unwrap().len(), 1);

        tx.send(batch(1, &[2.0, 3.0])).unwrap();
        tx.send(batch(2, &[4.0])).unwrap();
        let merged = stream.next().await.unwrap();
        assert_eq!(merged.sequence, 1);
        let stamps: Vec<f64> = merged.samples.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_source_keeps_stream_open() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = UnboundedReceiverStream::new(rx).coalesce(Duration::from_millis(10));

        let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err(), "an idle source must not end the stream");

        tx.send(batch(0, &[1.0])).unwrap();
        assert!(stream.next().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_pending_when_source_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = UnboundedReceiverStream::new(rx).coalesce(Duration::from_secs(60));

        tx.send(batch(0, &[1.0])).unwrap();
        stream.next().await.unwrap();
        tx.send(batch(1, &[2.0])).unwrap();
        drop(tx);

        assert_eq!(stream.next().await.map(|b| b.len()), Some(1));
        assert!(stream.next().await.is_none());
    }
}
