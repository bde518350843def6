//! Bounded-concurrency worker pool for per-item orchestration phases.
//!
//! A fixed number of workers pulls from a shared queue; each worker finishes
//! one item fully before taking the next. One item's failure never cancels
//! siblings. Workers observe a cancellation token between items and stop
//! pulling promptly; items never pulled are reported as interrupted.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Running processed/total counts, mirrored into the orchestration run row
/// by whoever drives the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolProgress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed { error: String },
    /// Never pulled because the pool was cancelled first.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct ItemResult<T> {
    pub item: T,
    pub outcome: ItemOutcome,
}

/// Aggregated per-item outcomes, in completion order. Across items there is
/// no ordering guarantee.
#[derive(Debug)]
pub struct PoolRunReport<T> {
    pub results: Vec<ItemResult<T>>,
    pub cancelled: bool,
}

impl<T> PoolRunReport<T> {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == ItemOutcome::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Failed { .. }))
            .count()
    }

    pub fn interrupted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == ItemOutcome::Interrupted)
            .count()
    }
}

pub struct WorkerPool {
    worker_count: usize,
    progress_tx: watch::Sender<PoolProgress>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let (progress_tx, _) = watch::channel(PoolProgress::default());
        Self {
            worker_count: worker_count.max(1),
            progress_tx,
        }
    }

    /// Subscribe to the running processed/total count.
    pub fn progress(&self) -> watch::Receiver<PoolProgress> {
        self.progress_tx.subscribe()
    }

    /// Process every item with at most `worker_count` in flight.
    ///
    /// `per_item` runs to completion for each pulled item — including its
    /// own ledger reads and writes — before the worker takes the next one.
    pub async fn process_all<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        per_item: F,
    ) -> PoolRunReport<T>
    where
        T: Send + Clone + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let total = items.len();
        self.progress_tx
            .send_replace(PoolProgress { processed: 0, total });

        if total == 0 {
            return PoolRunReport {
                results: Vec::new(),
                cancelled: cancel.is_cancelled(),
            };
        }

        let queue: Arc<Mutex<VecDeque<T>>> = Arc::new(Mutex::new(items.into()));
        let processed = Arc::new(AtomicUsize::new(0));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ItemResult<T>>();

        let mut workers = Vec::with_capacity(self.worker_count);
        for worker_index in 0..self.worker_count {
            let queue = Arc::clone(&queue);
            let processed = Arc::clone(&processed);
            let result_tx = result_tx.clone();
            let progress_tx = self.progress_tx.clone();
            let cancel = cancel.clone();
            let per_item = per_item.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    // Cancellation is observed between items, never mid-item:
                    // whatever is in flight finishes on its own terms.
                    if cancel.is_cancelled() {
                        debug!(worker_index, "worker stopping on cancellation");
                        break;
                    }

                    let Some(item) = queue.lock().pop_front() else {
                        break;
                    };

                    let outcome = match per_item(item.clone()).await {
                        Ok(()) => ItemOutcome::Succeeded,
                        Err(error) => ItemOutcome::Failed { error },
                    };

                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress_tx.send_replace(PoolProgress {
                        processed: done,
                        total,
                    });
                    let _ = result_tx.send(ItemResult { item, outcome });
                }
            }));
        }
        drop(result_tx);

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "pool worker panicked");
            }
        }

        let mut results = Vec::with_capacity(total);
        while let Ok(result) = result_rx.try_recv() {
            results.push(result);
        }

        // Items never pulled because of cancellation.
        let leftover: Vec<T> = queue.lock().drain(..).collect();
        let cancelled = cancel.is_cancelled();
        for item in leftover {
            results.push(ItemResult {
                item,
                outcome: ItemOutcome::Interrupted,
            });
        }

        PoolRunReport { results, cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn processes_every_item() {
        let pool = WorkerPool::new(4);
        let cancel = CancellationToken::new();
        let items: Vec<i32> = (0..50).collect();

        let report = pool
            .process_all(items, &cancel, |_item| async move { Ok(()) })
            .await;

        assert_eq!(report.results.len(), 50);
        assert_eq!(report.succeeded(), 50);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let pool = WorkerPool::new(3);
        let cancel = CancellationToken::new();
        let items: Vec<i32> = (0..20).collect();

        let report = pool
            .process_all(items, &cancel, |item| async move {
                if item == 7 {
                    Err("item 7 exploded".to_string())
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(report.results.len(), 20);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 19);
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        let mut progress = pool.progress();

        let report = pool
            .process_all((0..10).collect::<Vec<i32>>(), &cancel, |_| async { Ok(()) })
            .await;

        assert_eq!(report.succeeded(), 10);
        // The watch holds the final value after the run.
        let last = *progress.borrow_and_update();
        assert_eq!(last, PoolProgress { processed: 10, total: 10 });
    }

    #[tokio::test]
    async fn cancellation_stops_pulling_and_marks_leftovers() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let cancel_after_first = cancel.clone();

        let report = pool
            .process_all((0..10).collect::<Vec<i32>>(), &cancel, move |_item| {
                let cancel = cancel_after_first.clone();
                async move {
                    cancel.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                }
            })
            .await;

        assert!(report.cancelled);
        // The in-flight item finished; the rest were never pulled.
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.interrupted(), 9);
    }

    #[tokio::test]
    async fn empty_item_set_is_a_no_op() {
        let pool = WorkerPool::new(8);
        let cancel = CancellationToken::new();
        let report = pool
            .process_all(Vec::<i32>::new(), &cancel, |_| async { Ok(()) })
            .await;
        assert!(report.results.is_empty());
    }
}
