//! Shared helpers for behavioral specs

pub use relock::{
    ContextId, DistributedLock, Interrupt, LockConfig, LockError, LockRegistry, ReleaseOutcome,
};
pub use relock_adapters::FakeKvStore;
pub use relock_core::FakeClock;
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub const LOCK: &str = "A";

/// One lock instance per simulated process, all on the same store
pub struct Cluster<C: relock_core::Clock = relock_core::SystemClock> {
    pub store: FakeKvStore<C>,
    pub nodes: Vec<Arc<DistributedLock<FakeKvStore<C>>>>,
}

impl Cluster {
    pub fn new(nodes: usize) -> Self {
        Self::on_store(FakeKvStore::new(), nodes, LockConfig::default())
    }

    pub fn with_config(nodes: usize, config: LockConfig) -> Self {
        Self::on_store(FakeKvStore::new(), nodes, config)
    }
}

impl Cluster<FakeClock> {
    pub fn with_clock(clock: &FakeClock, nodes: usize) -> Self {
        Self::on_store(
            FakeKvStore::with_clock(clock.clone()),
            nodes,
            LockConfig::default(),
        )
    }
}

impl<C: relock_core::Clock> Cluster<C> {
    fn on_store(store: FakeKvStore<C>, nodes: usize, config: LockConfig) -> Self {
        let nodes = (0..nodes)
            .map(|_| Arc::new(DistributedLock::new(store.clone(), LOCK, config.clone()).unwrap()))
            .collect();
        Self { store, nodes }
    }

    pub fn node(&self, index: usize) -> Arc<DistributedLock<FakeKvStore<C>>> {
        Arc::clone(&self.nodes[index])
    }
}

/// Poll until `condition` holds, panicking after `limit`
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > limit {
            panic!("condition not met within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
