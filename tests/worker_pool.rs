//! Worker pool tests: bounded concurrency, failure isolation, progress
//! aggregation, and cooperative cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use billrun_core::orchestration::{ItemOutcome, WorkerPool};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn concurrency_never_exceeds_worker_count() {
    let pool = WorkerPool::new(4);
    let cancel = CancellationToken::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let in_flight_probe = Arc::clone(&in_flight);
    let peak_probe = Arc::clone(&peak);

    let report = pool
        .process_all((0..40).collect::<Vec<i32>>(), &cancel, move |_item| {
            let in_flight = Arc::clone(&in_flight_probe);
            let peak = Arc::clone(&peak_probe);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert_eq!(report.succeeded(), 40);
    assert!(peak.load(Ordering::SeqCst) <= 4, "peak concurrency exceeded worker count");
}

#[tokio::test]
async fn per_item_failures_are_isolated_and_reported() {
    let pool = WorkerPool::new(5);
    let cancel = CancellationToken::new();

    let report = pool
        .process_all((0..30).collect::<Vec<i32>>(), &cancel, |item| async move {
            if item % 10 == 3 {
                Err(format!("item {item} failed"))
            } else {
                Ok(())
            }
        })
        .await;

    assert_eq!(report.results.len(), 30);
    assert_eq!(report.failed(), 3);
    assert_eq!(report.succeeded(), 27);

    let failed_items: Vec<i32> = report
        .results
        .iter()
        .filter(|r| matches!(r.outcome, ItemOutcome::Failed { .. }))
        .map(|r| r.item)
        .collect();
    for item in failed_items {
        assert_eq!(item % 10, 3);
    }
}

#[tokio::test]
async fn cancellation_stops_new_pulls_promptly() {
    let pool = WorkerPool::new(2);
    let cancel = CancellationToken::new();
    let processed = Arc::new(AtomicUsize::new(0));

    let cancel_signal = cancel.clone();
    let processed_probe = Arc::clone(&processed);

    let report = pool
        .process_all((0..100).collect::<Vec<i32>>(), &cancel, move |_item| {
            let cancel = cancel_signal.clone();
            let processed = Arc::clone(&processed_probe);
            async move {
                // Abort the whole phase after the fourth item.
                if processed.fetch_add(1, Ordering::SeqCst) + 1 >= 4 {
                    cancel.cancel();
                }
                Ok(())
            }
        })
        .await;

    assert!(report.cancelled);
    assert!(report.interrupted() > 0, "unpulled items should be interrupted");
    // In-flight items were allowed to finish.
    assert_eq!(
        report.succeeded() + report.interrupted(),
        report.results.len()
    );
}

#[tokio::test]
async fn single_worker_processes_serially() {
    let pool = WorkerPool::new(1);
    let cancel = CancellationToken::new();
    let in_flight = Arc::new(AtomicUsize::new(0));

    let probe = Arc::clone(&in_flight);
    let report = pool
        .process_all((0..10).collect::<Vec<i32>>(), &cancel, move |_item| {
            let in_flight = Arc::clone(&probe);
            async move {
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(1)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert_eq!(report.succeeded(), 10);
}
