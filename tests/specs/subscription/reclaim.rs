//! Subscription reclamation specs
//!
//! Verify that an idle wake connection is closed after `max_connect_time`,
//! that a later wait reopens it, and that a dropped connection recovers.

use crate::prelude::*;

fn quick_reaper() -> LockConfig {
    LockConfig::default().with_max_connect_time(Duration::from_millis(50))
}

#[tokio::test]
async fn idle_connection_is_closed_then_reopened() {
    let cluster = Cluster::with_config(2, quick_reaper());
    let (holder, waiter) = (cluster.node(0), cluster.node(1));
    let channel = waiter.channel().to_string();

    holder.lock(ContextId::new(1)).await.unwrap();
    assert!(!waiter
        .try_lock_for(ContextId::new(1), Duration::from_millis(20))
        .await
        .unwrap());
    assert_eq!(cluster.store.subscriber_count(&channel), 1);

    wait_until(Duration::from_secs(1), || !waiter.subscription().is_connected()).await;
    assert_eq!(cluster.store.subscriber_count(&channel), 0);

    assert!(!waiter
        .try_lock_for(ContextId::new(1), Duration::from_millis(20))
        .await
        .unwrap());
    assert_eq!(waiter.subscription().connections_opened(), 2);
}

#[tokio::test]
async fn waiter_recovers_from_lost_connection() {
    let cluster = Cluster::with_config(2, quick_reaper());
    let (holder, waiter) = (cluster.node(0), cluster.node(1));
    holder
        .lock_with_lease(ContextId::new(1), Duration::from_secs(30))
        .await
        .unwrap();

    let task = {
        let waiter = Arc::clone(&waiter);
        tokio::spawn(async move { waiter.lock(ContextId::new(1)).await })
    };
    wait_until(Duration::from_secs(1), || waiter.subscription().waiter_count() == 1).await;

    cluster.store.drop_connections();

    // The blocked waiter is woken by the loss and reconnects on its own
    wait_until(Duration::from_secs(1), || {
        waiter.subscription().connections_opened() == 2
    })
    .await;
    assert_eq!(waiter.subscription().waiter_count(), 1);
    holder.unlock(ContextId::new(1)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(waiter.hold_count(ContextId::new(1)), 1);
}
