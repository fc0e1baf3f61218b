//! Wake propagation specs
//!
//! Verify that releasing a contended lock wakes waiters promptly instead of
//! leaving them to their timeouts, and that interruption stops a wait.

use crate::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contended_try_lock_acquires_soon_after_release() {
    let cluster = Cluster::new(2);
    let (t1, t2) = (cluster.node(0), cluster.node(1));
    let lease = Duration::from_millis(1000);

    t1.lock_with_lease(ContextId::new(1), lease).await.unwrap();
    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        t1.unlock(ContextId::new(1)).await.unwrap();
    });

    let started = Instant::now();
    let acquired = t2
        .try_lock_with_lease(ContextId::new(2), Duration::from_millis(2000), lease)
        .await
        .unwrap();
    let waited = started.elapsed();
    holder.await.unwrap();

    assert!(acquired);
    assert!(waited >= Duration::from_millis(150), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(700), "waited {:?}", waited);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn release_wakes_every_waiter() {
    let cluster = Cluster::new(4);
    let holder = cluster.node(0);
    holder
        .lock_with_lease(ContextId::new(1), Duration::from_secs(30))
        .await
        .unwrap();

    let mut waiters = Vec::new();
    for node in 1..4 {
        let lock = cluster.node(node);
        waiters.push(tokio::spawn(async move {
            let ctx = ContextId::new(1);
            let started = Instant::now();
            lock.lock(ctx).await.unwrap();
            let waited = started.elapsed();
            lock.unlock(ctx).await.unwrap();
            waited
        }));
    }
    wait_until(Duration::from_secs(1), || {
        (1..4).all(|node| cluster.nodes[node].subscription().waiter_count() == 1)
    })
    .await;

    holder.unlock(ContextId::new(1)).await.unwrap();

    for waiter in waiters {
        let waited = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(waited < Duration::from_secs(5));
    }
    assert!(!cluster.store.exists(LOCK));
}

#[tokio::test]
async fn interrupted_waiter_cleans_up() {
    let cluster = Cluster::new(2);
    let (holder, waiter) = (cluster.node(0), cluster.node(1));
    holder.lock(ContextId::new(1)).await.unwrap();
    let interrupt = Interrupt::new();

    let task = {
        let waiter = Arc::clone(&waiter);
        let interrupt = interrupt.clone();
        tokio::spawn(async move { waiter.lock_interruptibly(ContextId::new(1), &interrupt).await })
    };
    wait_until(Duration::from_secs(1), || waiter.subscription().waiter_count() == 1).await;
    interrupt.interrupt();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(LockError::Interrupted)));
    assert_eq!(waiter.subscription().waiter_count(), 0);
}
