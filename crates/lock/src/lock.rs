// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reentrant, lease-based distributed mutex
//!
//! The lock key is a hash of `owner key -> reentrant count` with a TTL equal
//! to the lease of the last successful acquire. Only the acquire and release
//! scripts touch it, so mutual exclusion rests on the store executing them
//! atomically. Wake messages on the lock's channel only shorten waits; a lost
//! message costs at most one lease of latency.

use crate::error::LockError;
use crate::interrupt::Interrupt;
use crate::subscription::SubscriptionMultiplexer;
use relock_adapters::KvStore;
use relock_core::{
    AcquireReply, ContextId, IdGen, LockConfig, OwnerKey, ReleaseReply, ScriptCall, UuidIdGen,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Result of a successful `unlock`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Last hold released; waiters were woken
    Released,
    /// Reentrant hold decremented; the caller still owns the lock
    StillHeld,
}

/// What this instance believes a context holds
#[derive(Clone, Copy, Debug)]
struct LocalHold {
    count: u32,
    /// Lease of the most recent acquire, re-applied on a reentrant unlock
    lease: Duration,
}

/// Unregisters a context from the multiplexer when an acquisition loop ends
///
/// Covers every exit path: success, timeout, error, interruption, or the
/// acquiring future being dropped mid-subscribe or mid-wait.
struct WaiterGuard<'a, S: KvStore> {
    subscription: &'a SubscriptionMultiplexer<S>,
    ctx: ContextId,
}

impl<'a, S: KvStore> WaiterGuard<'a, S> {
    fn new(subscription: &'a SubscriptionMultiplexer<S>, ctx: ContextId) -> Self {
        Self { subscription, ctx }
    }
}

impl<S: KvStore> Drop for WaiterGuard<'_, S> {
    fn drop(&mut self) {
        self.subscription.unsubscribe(self.ctx);
    }
}

/// A named lock shared by every local caller of one instance
///
/// Callers identify themselves with a [`ContextId`]; each context holds and
/// re-enters the lock independently.
pub struct DistributedLock<S: KvStore> {
    name: String,
    instance_id: String,
    config: LockConfig,
    store: S,
    subscription: SubscriptionMultiplexer<S>,
    holds: Mutex<HashMap<ContextId, LocalHold>>,
}

impl<S: KvStore> DistributedLock<S> {
    pub fn new(store: S, name: impl Into<String>, config: LockConfig) -> Result<Self, LockError> {
        Self::with_id_gen(store, name, config, &UuidIdGen)
    }

    /// Build with a custom instance ID source
    pub fn with_id_gen(
        store: S,
        name: impl Into<String>,
        config: LockConfig,
        id_gen: &impl IdGen,
    ) -> Result<Self, LockError> {
        let name = name.into();
        if name.is_empty() {
            return Err(LockError::InvalidArgument(
                "lock name must not be empty".to_string(),
            ));
        }
        config
            .validate()
            .map_err(|e| LockError::InvalidArgument(e.to_string()))?;

        let subscription = SubscriptionMultiplexer::new(
            store.clone(),
            config.channel_for(&name),
            config.max_connect_time,
        );
        Ok(Self {
            name,
            instance_id: id_gen.next(),
            config,
            store,
            subscription,
            holds: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn owner_key(&self, ctx: ContextId) -> OwnerKey {
        OwnerKey::new(&self.instance_id, ctx)
    }

    pub fn subscription(&self) -> &SubscriptionMultiplexer<S> {
        &self.subscription
    }

    /// Reentrant count this instance has recorded for `ctx`
    pub fn hold_count(&self, ctx: ContextId) -> u32 {
        self.holds().get(&ctx).map_or(0, |hold| hold.count)
    }

    // -- blocking --------------------------------------------------------

    /// Block until acquired, using the default lease
    pub async fn lock(&self, ctx: ContextId) -> Result<(), LockError> {
        self.lock_with_lease(ctx, self.config.default_lease).await
    }

    pub async fn lock_with_lease(&self, ctx: ContextId, lease: Duration) -> Result<(), LockError> {
        self.acquire(ctx, lease, None, None).await.map(|_| ())
    }

    pub async fn lock_interruptibly(
        &self,
        ctx: ContextId,
        interrupt: &Interrupt,
    ) -> Result<(), LockError> {
        self.lock_interruptibly_with_lease(ctx, self.config.default_lease, interrupt)
            .await
    }

    pub async fn lock_interruptibly_with_lease(
        &self,
        ctx: ContextId,
        lease: Duration,
        interrupt: &Interrupt,
    ) -> Result<(), LockError> {
        self.acquire(ctx, lease, None, Some(interrupt))
            .await
            .map(|_| ())
    }

    // -- bounded ---------------------------------------------------------

    /// Single attempt with the default lease
    pub async fn try_lock(&self, ctx: ContextId) -> Result<bool, LockError> {
        let lease = self.config.default_lease;
        validate_lease(lease)?;
        Ok(self.try_acquire(ctx, lease).await?.is_acquired())
    }

    pub async fn try_lock_for(&self, ctx: ContextId, wait: Duration) -> Result<bool, LockError> {
        self.try_lock_with_lease(ctx, wait, self.config.default_lease)
            .await
    }

    /// Wait up to `wait` for the lock, holding it for `lease` once acquired
    ///
    /// Returns `Ok(false)` when the lock stayed held by someone else for the
    /// whole budget. A zero `wait` makes exactly one attempt.
    pub async fn try_lock_with_lease(
        &self,
        ctx: ContextId,
        wait: Duration,
        lease: Duration,
    ) -> Result<bool, LockError> {
        self.acquire(ctx, lease, Some(wait), None).await
    }

    pub async fn try_lock_interruptibly(
        &self,
        ctx: ContextId,
        wait: Duration,
        lease: Duration,
        interrupt: &Interrupt,
    ) -> Result<bool, LockError> {
        self.acquire(ctx, lease, Some(wait), Some(interrupt)).await
    }

    // -- release ---------------------------------------------------------

    /// Release one hold of `ctx`
    ///
    /// Fails with [`LockError::NotHeld`] when `ctx` does not hold the lock,
    /// including when it has already released every hold.
    pub async fn unlock(&self, ctx: ContextId) -> Result<ReleaseOutcome, LockError> {
        let owner = self.owner_key(ctx);
        let Some(hold) = self.holds().get(&ctx).copied() else {
            warn!(lock = %self.name, %owner, "unlock without a local hold");
            return Err(self.not_held(&owner));
        };

        let call = ScriptCall::release(
            &self.name,
            self.channel(),
            &self.config.wake_payload,
            hold.lease,
            &owner,
        );
        let reply = ReleaseReply::from_reply(self.store.eval(&call).await?)?;

        match reply {
            ReleaseReply::Released => {
                self.holds().remove(&ctx);
                debug!(lock = %self.name, %owner, "lock released");
                Ok(ReleaseOutcome::Released)
            }
            ReleaseReply::StillHeld => {
                let mut holds = self.holds();
                if let Some(hold) = holds.get_mut(&ctx) {
                    // The store still counts a hold, so never drop below one
                    hold.count = hold.count.saturating_sub(1).max(1);
                    trace!(lock = %self.name, %owner, count = hold.count, "reentrant hold released");
                }
                Ok(ReleaseOutcome::StillHeld)
            }
            ReleaseReply::NotHeld => {
                // Lease ran out and another owner took the key
                self.holds().remove(&ctx);
                warn!(lock = %self.name, %owner, "lock was no longer held at unlock");
                Err(self.not_held(&owner))
            }
        }
    }

    // -- internals -------------------------------------------------------

    fn holds(&self) -> MutexGuard<'_, HashMap<ContextId, LocalHold>> {
        self.holds.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_held(&self, owner: &OwnerKey) -> LockError {
        LockError::NotHeld {
            name: self.name.clone(),
            owner: owner.to_string(),
        }
    }

    /// One run of the acquire script
    async fn try_acquire(&self, ctx: ContextId, lease: Duration) -> Result<AcquireReply, LockError> {
        let owner = self.owner_key(ctx);
        let call = ScriptCall::acquire(&self.name, lease, &owner);
        let reply = AcquireReply::from_reply(self.store.eval(&call).await?);

        match reply {
            AcquireReply::Acquired => {
                let mut holds = self.holds();
                let hold = holds.entry(ctx).or_insert(LocalHold { count: 0, lease });
                hold.count = hold.count.saturating_add(1);
                hold.lease = lease;
                debug!(lock = %self.name, %owner, count = hold.count, "lock acquired");
            }
            AcquireReply::Contended { ttl } => {
                trace!(
                    lock = %self.name,
                    %owner,
                    ttl_ms = ttl.map(|ttl| ttl.as_millis() as u64),
                    "lock contended"
                );
            }
        }
        Ok(reply)
    }

    /// Acquire loop shared by every blocking and bounded variant
    ///
    /// `wait: None` waits forever. Returns `Ok(false)` only when `wait` runs out.
    async fn acquire(
        &self,
        ctx: ContextId,
        lease: Duration,
        wait: Option<Duration>,
        interrupt: Option<&Interrupt>,
    ) -> Result<bool, LockError> {
        validate_lease(lease)?;
        check_interrupt(interrupt)?;
        let deadline = wait.map(|wait| Instant::now() + wait);

        if self.try_acquire(ctx, lease).await?.is_acquired() {
            return Ok(true);
        }
        if wait.is_some_and(|wait| wait.is_zero()) {
            return Ok(false);
        }

        let _waiter = WaiterGuard::new(&self.subscription, ctx);
        loop {
            // Every round subscribes again: a no-op while the connection is
            // up, a reconnect after it was lost
            let subscribed =
                within(self.subscription.subscribe(ctx), deadline, interrupt).await?;
            if subscribed.is_none() {
                debug!(lock = %self.name, ctx = %ctx, "wait budget exhausted while subscribing");
                return Ok(false);
            }

            // Retry before waiting: a release between the last attempt and
            // subscribing published to nobody
            let ttl = match self.try_acquire(ctx, lease).await? {
                AcquireReply::Acquired => return Ok(true),
                AcquireReply::Contended { ttl } => ttl,
            };

            // No TTL on the key means retry at once rather than wait forever
            let mut timeout = ttl.unwrap_or(Duration::ZERO);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(lock = %self.name, ctx = %ctx, "wait budget exhausted");
                    return Ok(false);
                }
                timeout = timeout.min(remaining);
            }

            self.wait_for_release(ctx, timeout, interrupt).await?;
        }
    }

    async fn wait_for_release(
        &self,
        ctx: ContextId,
        timeout: Duration,
        interrupt: Option<&Interrupt>,
    ) -> Result<(), LockError> {
        if timeout.is_zero() {
            tokio::task::yield_now().await;
            return check_interrupt(interrupt);
        }

        let Some(interrupt) = interrupt else {
            self.subscription.listen(ctx, timeout).await;
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = interrupt.interrupted() => {
                debug!(lock = %self.name, ctx = %ctx, "wait interrupted");
                Err(LockError::Interrupted)
            }
            _ = self.subscription.listen(ctx, timeout) => Ok(()),
        }
    }
}

/// Run `op` until `deadline`, giving up early if `interrupt` fires
///
/// `Ok(None)` means the deadline came first.
async fn within<T>(
    op: impl Future<Output = Result<T, LockError>>,
    deadline: Option<Instant>,
    interrupt: Option<&Interrupt>,
) -> Result<Option<T>, LockError> {
    let bounded = async {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, op).await.ok(),
            None => Some(op.await),
        }
    };
    let outcome = match interrupt {
        None => bounded.await,
        Some(interrupt) => tokio::select! {
            biased;
            _ = interrupt.interrupted() => return Err(LockError::Interrupted),
            outcome = bounded => outcome,
        },
    };
    outcome.transpose()
}

fn validate_lease(lease: Duration) -> Result<(), LockError> {
    if lease.as_millis() == 0 {
        return Err(LockError::InvalidArgument(format!(
            "lease must be at least 1ms, got {:?}",
            lease
        )));
    }
    Ok(())
}

fn check_interrupt(interrupt: Option<&Interrupt>) -> Result<(), LockError> {
    match interrupt {
        Some(interrupt) if interrupt.is_interrupted() => Err(LockError::Interrupted),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
