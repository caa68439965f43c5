use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use sluice_import_core::{ExecutorOptions, Progress, ShrinkPolicy, StoreError};
use tokio_util::sync::CancellationToken;

mod common;

use common::{ScriptedStore, batch_stream, batches, executor};

fn transient() -> StoreError {
    StoreError::Transient {
        message: "connection reset".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_batches_written() {
    let store = Arc::new(ScriptedStore::accepting(5.0));
    let executor = executor(store.clone(), ExecutorOptions::default());
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(3, 10)), &ct).await;

    assert_eq!(summary.documents_written, 30);
    assert_eq!(summary.total_cost, 150.0);
    assert_eq!(summary.batches_written, 3);
    assert_eq!(summary.batches_failed, 0);
    assert!(!summary.cancelled);
    assert_eq!(store.calls("0"), 1);
    assert_eq!(store.calls("29"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_batch_does_not_stop_run() {
    // Documents of the first batch always fail.
    let store = Arc::new(ScriptedStore::new(|document, _| {
        let id: usize = document.id().parse().expect("numeric id");
        if id < 10 { Err(transient()) } else { Ok(3.0) }
    }));
    let options = ExecutorOptions {
        max_attempts: 3,
        max_concurrent_batches: 1,
        ..Default::default()
    };
    let executor = executor(store.clone(), options);
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(3, 10)), &ct).await;

    assert_eq!(summary.batches_failed, 1);
    assert_eq!(summary.documents_failed, 10);
    assert_eq!(summary.batches_written, 2);
    assert_eq!(summary.documents_written, 20);
    assert_eq!(summary.total_cost, 60.0);
    assert_eq!(store.calls("0"), 3);

    // Backoff after the first and second attempts only.
    assert!(summary.elapsed >= Duration::from_secs(6));
    assert!(summary.elapsed < Duration::from_secs(14));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_batch_is_retried() {
    let store = Arc::new(ScriptedStore::new(|_, call| {
        if call == 1 {
            Err(StoreError::RateLimited {
                retry_after: Some(Duration::from_millis(300)),
            })
        } else {
            Ok(2.0)
        }
    }));
    let executor = executor(store.clone(), ExecutorOptions::default());
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(2, 5)), &ct).await;

    assert_eq!(summary.documents_written, 10);
    assert_eq!(summary.total_cost, 20.0);
    assert_eq!(summary.batches_failed, 0);
    assert!(summary.elapsed >= Duration::from_millis(300));
    // Every document was rejected once.
    assert_eq!(summary.rejected_writes, 10);
    assert_eq!(store.calls("0"), 2);
    assert_eq!(store.calls("9"), 2);
}

/// Every document fails its first three writes.
fn failing_three_times() -> ScriptedStore {
    ScriptedStore::new(|_, call| if call <= 3 { Err(transient()) } else { Ok(1.0) })
}

#[tokio::test(start_paused = true)]
async fn test_shrunk_batch_requeues_remainder() {
    let store = Arc::new(failing_three_times());
    let options = ExecutorOptions {
        smaller_batch_size: 25,
        shrink_policy: ShrinkPolicy::Requeue,
        ..Default::default()
    };
    let executor = executor(store.clone(), options);
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(1, 40)), &ct).await;

    assert_eq!(summary.documents_written, 40);
    assert_eq!(summary.batches_written, 2);
    assert_eq!(summary.requeued_documents, 15);
    assert_eq!(summary.documents_dropped, 0);
    assert_eq!(summary.total_cost, 40.0);

    // The prefix was written on the fourth attempt, the rest on its first requeued attempt.
    assert_eq!(store.calls("0"), 4);
    assert_eq!(store.calls("39"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_shrunk_batch_drops_remainder() {
    let store = Arc::new(failing_three_times());
    let options = ExecutorOptions {
        smaller_batch_size: 25,
        shrink_policy: ShrinkPolicy::Drop,
        ..Default::default()
    };
    let executor = executor(store.clone(), options);
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(1, 40)), &ct).await;

    assert_eq!(summary.documents_written, 25);
    assert_eq!(summary.batches_written, 1);
    assert_eq!(summary.requeued_documents, 0);
    assert_eq!(summary.documents_dropped, 15);
    assert_eq!(store.calls("24"), 4);
    assert_eq!(store.calls("25"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_counts_as_written() {
    let store = Arc::new(ScriptedStore::new(|document, _| {
        if document.id() == "3" {
            Err(StoreError::Conflict {
                id: document.id().to_string(),
            })
        } else {
            Ok(4.0)
        }
    }));
    let executor = executor(store.clone(), ExecutorOptions::default());
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(1, 5)), &ct).await;

    assert_eq!(summary.documents_written, 5);
    assert_eq!(summary.total_cost, 16.0);
    assert_eq!(store.calls("3"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_batches_are_bounded() {
    let store = Arc::new(ScriptedStore::accepting(1.0).with_delay(Duration::from_millis(50)));
    let options = ExecutorOptions {
        max_concurrent_batches: 2,
        ..Default::default()
    };
    let executor = executor(store.clone(), options);
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(10, 1)), &ct).await;

    assert_eq!(summary.documents_written, 10);
    assert_eq!(store.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_min_time_between_batches() {
    let store = Arc::new(ScriptedStore::accepting(1.0));
    let options = ExecutorOptions {
        min_time_between_batches: Duration::from_millis(100),
        ..Default::default()
    };
    let executor = executor(store.clone(), options);
    let ct = CancellationToken::new();

    let summary = executor.run(batch_stream(batches(5, 2)), &ct).await;

    assert_eq!(summary.documents_written, 10);
    assert!(summary.elapsed >= Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_reported_periodically() {
    let store = Arc::new(ScriptedStore::accepting(1.0));
    let options = ExecutorOptions {
        progress_interval: 10,
        ..Default::default()
    };

    let reports = Arc::new(Mutex::new(Vec::<Progress>::new()));
    let executor = executor(store, options).with_progress(Arc::new({
        let reports = reports.clone();
        move |progress: Progress| reports.lock().expect("reports lock").push(progress)
    }));
    let ct = CancellationToken::new();

    executor.run(batch_stream(batches(25, 1)), &ct).await;

    let reports = reports.lock().expect("reports lock").clone();
    assert_eq!(
        reports,
        vec![
            Progress {
                completed: 10,
                total: 25
            },
            Progress {
                completed: 20,
                total: 25
            },
            Progress {
                completed: 25,
                total: 25
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run() {
    let store = Arc::new(ScriptedStore::accepting(1.0).with_delay(Duration::from_secs(3600)));
    let executor = executor(store.clone(), ExecutorOptions::default());
    let ct = CancellationToken::new();

    tokio::spawn({
        let ct = ct.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ct.cancel();
        }
    });

    let summary = executor.run(batch_stream(batches(10, 10)), &ct).await;

    assert!(summary.cancelled);
    assert_eq!(summary.documents_written, 0);
    assert!(summary.elapsed < Duration::from_secs(2));
}
