//! Fixed-size worker pool for per-item fan-out.
//!
//! `min(workers, count)` tasks pull item indices from a shared cursor, so the
//! number of tasks never depends on input size. Every event a worker emits is
//! tagged with its item index and funneled through one channel; the consumer
//! writes results into index-addressed slots, which keeps output order
//! independent of completion order.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Handle a unit of work uses to report events for its item.
pub(crate) struct EventSink<T> {
    index: usize,
    tx: mpsc::UnboundedSender<(usize, T)>,
}

impl<T> EventSink<T> {
    /// Send an event tagged with this item's index.
    ///
    /// Returns `false` once the consumer has gone away.
    pub(crate) fn emit(&self, event: T) -> bool {
        self.tx.send((self.index, event)).is_ok()
    }
}

/// Running fan-out. Dropping it aborts every worker.
pub(crate) struct FanOut<T> {
    rx: mpsc::UnboundedReceiver<(usize, T)>,
    _workers: JoinSet<()>,
}

impl<T> FanOut<T> {
    /// Next `(index, event)`, or `None` once every item has been processed.
    pub(crate) async fn next(&mut self) -> Option<(usize, T)> {
        self.rx.recv().await
    }
}

/// Process items `0..count` with at most `workers` concurrent tasks.
pub(crate) fn fan_out<T, F, Fut>(count: usize, workers: usize, work: F) -> FanOut<T>
where
    T: Send + 'static,
    F: Fn(usize, EventSink<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cursor = Arc::new(AtomicUsize::new(0));
    let work = Arc::new(work);
    let mut set = JoinSet::new();

    for _ in 0..workers.max(1).min(count) {
        let tx = tx.clone();
        let cursor = cursor.clone();
        let work = work.clone();

        set.spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                if index >= count || tx.is_closed() {
                    break;
                }
                let sink = EventSink {
                    index,
                    tx: tx.clone(),
                };
                work(index, sink).await;
            }
        });
    }

    FanOut { rx, _workers: set }
}
