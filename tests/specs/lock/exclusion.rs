//! Mutual exclusion specs
//!
//! Verify that at most one owner holds a lock at a time, across instances
//! and across contexts of one instance, and that reentrant holds balance.

use crate::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_overlap() {
    let cluster = Cluster::new(3);
    let inside = Arc::new(AtomicUsize::new(0));
    let acquisitions = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for task in 0..12u64 {
        let lock = cluster.node(task as usize % 3);
        let inside = Arc::clone(&inside);
        let acquisitions = Arc::clone(&acquisitions);
        let releases = Arc::clone(&releases);
        handles.push(tokio::spawn(async move {
            let ctx = ContextId::new(task);
            for _ in 0..3 {
                lock.lock(ctx).await.unwrap();
                acquisitions.fetch_add(1, Ordering::SeqCst);
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders at once");
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                assert_eq!(lock.unlock(ctx).await.unwrap(), ReleaseOutcome::Released);
                releases.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(20), handle)
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(acquisitions.load(Ordering::SeqCst), 36);
    assert_eq!(releases.load(Ordering::SeqCst), 36);
    assert!(!cluster.store.exists(LOCK));
}

#[tokio::test]
async fn reentrant_holds_release_only_after_matching_unlocks() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    let ctx = ContextId::new(1);

    for _ in 0..3 {
        a.lock(ctx).await.unwrap();
    }
    for _ in 0..2 {
        assert_eq!(a.unlock(ctx).await.unwrap(), ReleaseOutcome::StillHeld);
        assert!(!b.try_lock(ctx).await.unwrap());
    }
    assert_eq!(a.unlock(ctx).await.unwrap(), ReleaseOutcome::Released);
    assert!(b.try_lock(ctx).await.unwrap());

    assert!(matches!(
        a.unlock(ctx).await,
        Err(LockError::NotHeld { .. })
    ));
}

#[tokio::test]
async fn registry_shares_one_instance_per_name() {
    let store = FakeKvStore::new();
    let registry = LockRegistry::new(store.clone(), LockConfig::default()).unwrap();

    let first = registry.get_lock(LOCK).unwrap();
    let second = registry.get_lock(LOCK).unwrap();
    first.lock(ContextId::new(1)).await.unwrap();

    assert_eq!(second.hold_count(ContextId::new(1)), 1);
    assert!(!second.try_lock(ContextId::new(2)).await.unwrap());
}
