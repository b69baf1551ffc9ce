use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use en_ingest_agent::storage::StorageController;
use en_ingest_agent_core::StorageKey;
use test_log::test;

const COUNTER: StorageKey<u32> = StorageKey::new("test", "counter");

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn exclusive_blocks_never_overlap() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageController::new(dir.path()).unwrap();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    // Act
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let storage = storage.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tokio::spawn(async move {
                for _ in 0..10 {
                    storage
                        .with_exclusive_access(|storage| {
                            let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now_inside, Ordering::SeqCst);

                            let n = storage.retrieve(&COUNTER).unwrap_or_default();
                            std::thread::sleep(Duration::from_micros(200));
                            storage.store(&COUNTER, &(n + 1)).unwrap();

                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // Assert
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(storage.retrieve(&COUNTER), Some(160));
}

#[test(tokio::test)]
async fn exclusive_access_returns_the_body_result() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageController::new(dir.path()).unwrap();

    let stored = storage
        .with_exclusive_access(|storage| storage.store(&COUNTER, &7))
        .await;

    assert!(stored.is_ok());
    assert_eq!(storage.retrieve(&COUNTER), Some(7));
}
