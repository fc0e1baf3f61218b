//! Lease specs
//!
//! Verify that a holder which never unlocks loses the lock once its lease
//! runs out, and that waiters pick it up without a wake message.

use crate::prelude::*;

#[tokio::test]
async fn crashed_holder_releases_after_lease() {
    let clock = FakeClock::new();
    let cluster = Cluster::with_clock(&clock, 2);
    let (crashed, survivor) = (cluster.node(0), cluster.node(1));

    crashed
        .lock_with_lease(ContextId::new(1), Duration::from_millis(1000))
        .await
        .unwrap();
    drop(crashed);

    clock.advance(Duration::from_millis(999));
    assert!(!survivor.try_lock(ContextId::new(1)).await.unwrap());

    clock.advance(Duration::from_millis(1));
    assert!(survivor.try_lock(ContextId::new(1)).await.unwrap());
}

#[tokio::test]
async fn renewing_a_hold_extends_the_lease() {
    let clock = FakeClock::new();
    let cluster = Cluster::with_clock(&clock, 2);
    let (holder, other) = (cluster.node(0), cluster.node(1));
    let lease = Duration::from_millis(1000);

    holder.lock_with_lease(ContextId::new(1), lease).await.unwrap();
    clock.advance(Duration::from_millis(800));
    holder.lock_with_lease(ContextId::new(1), lease).await.unwrap();
    clock.advance(Duration::from_millis(800));

    assert!(!other.try_lock(ContextId::new(1)).await.unwrap());
    assert_eq!(cluster.store.pttl(LOCK), 200);
}

#[tokio::test]
async fn waiter_takes_over_expired_lock_without_wake() {
    let clock = FakeClock::new();
    let cluster = Cluster::with_clock(&clock, 2);
    let (crashed, waiter) = (cluster.node(0), cluster.node(1));

    crashed
        .lock_with_lease(ContextId::new(1), Duration::from_millis(100))
        .await
        .unwrap();

    let task = {
        let waiter = Arc::clone(&waiter);
        tokio::spawn(async move {
            waiter
                .try_lock_with_lease(ContextId::new(1), Duration::from_secs(5), Duration::from_secs(1))
                .await
        })
    };
    wait_until(Duration::from_secs(1), || waiter.subscription().waiter_count() == 1).await;
    clock.advance(Duration::from_millis(100));

    let acquired = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(acquired);
    assert!(cluster.store.published().is_empty());
}
