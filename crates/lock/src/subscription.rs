// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription multiplexer for lock wake messages
//!
//! Many local callers wait on one lock's channel through a single
//! subscription connection. Each caller registers under its [`ContextId`];
//! a delivered message is recorded for every registered caller and wakes all
//! of them at once. Each one then retries its own acquire script, so it does
//! not matter which of them "gets" the message.
//!
//! The connection is opened lazily by the first `subscribe`, is left open when
//! callers unsubscribe, and is closed by an idle reaper that runs every
//! `max_connect_time` once no callers are registered. When the connection
//! dies, every waiter is woken so it can subscribe again, which opens a
//! fresh connection.
//!
//! Connection state only changes under a std mutex that is never held across
//! an await: connections are opened and closed outside it, then committed or
//! detached with a compare-and-swap on the `connected` flag.

use crate::error::LockError;
use relock_adapters::{KvStore, PubSubConnection};
use relock_core::ContextId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Registered waiters and the last wake payload each has not yet consumed
#[derive(Default)]
struct WaiterTable {
    payloads: Mutex<HashMap<ContextId, Option<String>>>,
    wake: Notify,
}

impl WaiterTable {
    fn payloads(&self) -> MutexGuard<'_, HashMap<ContextId, Option<String>>> {
        self.payloads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, ctx: ContextId) {
        self.payloads().entry(ctx).or_insert(None);
    }

    fn remove(&self, ctx: ContextId) -> bool {
        self.payloads().remove(&ctx).is_some()
    }

    fn len(&self) -> usize {
        self.payloads().len()
    }

    fn take(&self, ctx: ContextId) -> Option<String> {
        self.payloads().get_mut(&ctx).and_then(Option::take)
    }

    /// Record `payload` for every waiter and wake them all
    fn deliver(&self, payload: &str) -> usize {
        let woken = {
            let mut payloads = self.payloads();
            for slot in payloads.values_mut() {
                *slot = Some(payload.to_string());
            }
            payloads.len()
        };
        self.wake.notify_waiters();
        woken
    }

    /// End every pending wait without a payload
    fn wake_all(&self) {
        self.wake.notify_waiters();
    }

    /// `lost` is checked after registering, so a loss that happened before
    /// the wait ends it at once instead of after `timeout`
    async fn wait(
        &self,
        ctx: ContextId,
        timeout: Duration,
        lost: impl Fn() -> bool,
    ) -> Option<String> {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        // Register interest before checking, so a delivery in between still wakes us
        let _ = notified.as_mut().enable();

        if let Some(payload) = self.take(ctx) {
            return Some(payload);
        }
        if lost() {
            return None;
        }
        if tokio::time::timeout(timeout, notified).await.is_err() {
            trace!(%ctx, timeout_ms = timeout.as_millis() as u64, "listen timed out");
        }
        self.take(ctx)
    }
}

/// Background task that owns one subscription connection
struct Listener {
    task: JoinHandle<()>,
    /// Set by the task once the connection has died
    lost: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Listener {
    fn spawn(
        channel: String,
        connection: Box<dyn PubSubConnection>,
        waiters: Arc<WaiterTable>,
    ) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let lost = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(listen_loop(
            channel,
            connection,
            waiters,
            Arc::clone(&lost),
            shutdown_rx,
        ));
        Self {
            task,
            lost,
            shutdown: Some(shutdown),
        }
    }

    fn is_alive(&self) -> bool {
        !self.lost.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Stop the task and wait for it to close the connection
    async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.task.await;
    }
}

async fn listen_loop(
    channel: String,
    mut connection: Box<dyn PubSubConnection>,
    waiters: Arc<WaiterTable>,
    lost: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    while !connection.is_closed() {
        tokio::select! {
            // Fires on explicit shutdown and when the Listener is dropped
            _ = &mut shutdown => {
                connection.close().await;
                debug!(channel = %channel, "subscription connection closed");
                return;
            }
            message = connection.next_message() => match message {
                Some(payload) => {
                    let woken = waiters.deliver(&payload);
                    trace!(channel = %channel, woken, "wake message delivered");
                }
                None => break,
            }
        }
    }

    lost.store(true, Ordering::Release);
    warn!(channel = %channel, "subscription connection lost");
    // Waiters re-subscribe on wake, which replaces the dead connection
    waiters.wake_all();
}

enum ConnectionState {
    Disconnected,
    Connected(Listener),
}

impl ConnectionState {
    fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Connected, but the listener has seen the connection die
    fn is_lost(&self) -> bool {
        matches!(self, ConnectionState::Connected(listener) if !listener.is_alive())
    }
}

/// Outcome of committing a freshly opened connection
enum Attach {
    Committed,
    /// Another caller connected first; close this one
    Surplus(Box<dyn PubSubConnection>),
    /// `connected` disagrees with the state; close this one and fail
    Inconsistent(Box<dyn PubSubConnection>),
}

struct Shared<S> {
    store: S,
    channel: String,
    max_connect_time: Duration,
    waiters: Arc<WaiterTable>,
    connection: Mutex<ConnectionState>,
    /// Mirrors `connection`; only flipped by compare-and-swap under its mutex
    connected: AtomicBool,
    connections_opened: AtomicU64,
    reaper_started: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<S: KvStore> Shared<S> {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connected -> Disconnected; the caller closes the returned listener
    fn detach(&self, state: &mut ConnectionState) -> Option<Listener> {
        let ConnectionState::Connected(listener) =
            std::mem::replace(state, ConnectionState::Disconnected)
        else {
            return None;
        };
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(channel = %self.channel, "connection flag was already cleared");
        }
        Some(listener)
    }

    /// Disconnected -> Connected with `connection`, registering `ctx` either way
    fn attach(&self, connection: Box<dyn PubSubConnection>, ctx: ContextId) -> Attach {
        let mut state = self.state();
        let won = self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        match (won, state.is_connected()) {
            (true, false) => {
                *state = ConnectionState::Connected(Listener::spawn(
                    self.channel.clone(),
                    connection,
                    Arc::clone(&self.waiters),
                ));
                self.connections_opened.fetch_add(1, Ordering::Relaxed);
                self.waiters.register(ctx);
                info!(channel = %self.channel, "subscription connection opened");
                Attach::Committed
            }
            (false, true) => {
                self.waiters.register(ctx);
                Attach::Surplus(connection)
            }
            _ => Attach::Inconsistent(connection),
        }
    }

    /// One reaper pass: drop a dead connection, close an idle one
    async fn reap(&self) {
        let stale = {
            let mut state = self.state();
            if state.is_lost() {
                warn!(channel = %self.channel, "resetting lost subscription connection");
                self.detach(&mut state)
            } else if state.is_connected() && self.waiters.len() == 0 {
                info!(channel = %self.channel, "closing idle subscription connection");
                self.detach(&mut state)
            } else {
                None
            }
        };
        if let Some(listener) = stale {
            listener.close().await;
        }
    }
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        let reaper = self.reaper.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = reaper.take() {
            handle.abort();
        }
    }
}

/// Shares one subscription connection between every local waiter on a channel
pub struct SubscriptionMultiplexer<S> {
    shared: Arc<Shared<S>>,
}

impl<S: KvStore> SubscriptionMultiplexer<S> {
    pub fn new(store: S, channel: impl Into<String>, max_connect_time: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                channel: channel.into(),
                max_connect_time,
                waiters: Arc::new(WaiterTable::default()),
                connection: Mutex::new(ConnectionState::Disconnected),
                connected: AtomicBool::new(false),
                connections_opened: AtomicU64::new(0),
                reaper_started: AtomicBool::new(false),
                reaper: Mutex::new(None),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Register `ctx` as a waiter, opening the shared connection if needed
    ///
    /// Idempotent per context. A connection that has died is replaced.
    pub async fn subscribe(&self, ctx: ContextId) -> Result<(), LockError> {
        let stale = {
            let mut state = self.shared.state();
            if state.is_lost() {
                warn!(channel = %self.shared.channel, "subscription connection lost, reconnecting");
                self.shared.detach(&mut state)
            } else if state.is_connected() {
                // Registered under the state mutex so the reaper never closes
                // a connection that a waiter has just joined
                self.shared.waiters.register(ctx);
                trace!(channel = %self.shared.channel, %ctx, "waiter registered");
                drop(state);
                self.start_reaper();
                return Ok(());
            } else {
                None
            }
        };
        if let Some(listener) = stale {
            listener.close().await;
        }

        let connection = self.shared.store.subscribe(&self.shared.channel).await?;
        match self.shared.attach(connection, ctx) {
            Attach::Committed => {}
            Attach::Surplus(mut connection) => {
                connection.close().await;
                debug!(channel = %self.shared.channel, "closed surplus subscription connection");
            }
            Attach::Inconsistent(mut connection) => {
                connection.close().await;
                return Err(LockError::SubscriptionState(format!(
                    "{} connected flag disagrees with its listener",
                    self.shared.channel
                )));
            }
        }
        trace!(channel = %self.shared.channel, %ctx, "waiter registered");
        self.start_reaper();
        Ok(())
    }

    /// Wait until a wake message arrives for `ctx` or `timeout` elapses
    ///
    /// Returns the payload observed, if any, and clears it. Also returns
    /// early, with `None`, when the connection is lost.
    pub async fn listen(&self, ctx: ContextId, timeout: Duration) -> Option<String> {
        self.shared
            .waiters
            .wait(ctx, timeout, || self.shared.state().is_lost())
            .await
    }

    /// [`listen`](Self::listen) bounded by `max_connect_time`
    pub async fn listen_default(&self, ctx: ContextId) -> Option<String> {
        self.listen(ctx, self.shared.max_connect_time).await
    }

    /// Remove `ctx`'s registration; the connection is left to the reaper
    pub fn unsubscribe(&self, ctx: ContextId) {
        if self.shared.waiters.remove(ctx) {
            trace!(channel = %self.shared.channel, %ctx, "waiter removed");
        }
    }

    /// Close the shared connection now
    pub async fn release(&self) {
        let listener = {
            let mut state = self.shared.state();
            self.shared.detach(&mut state)
        };
        if let Some(listener) = listener {
            listener.close().await;
        }
    }

    /// Stop the reaper and close the connection
    pub async fn shutdown(&self) {
        let reaper = self
            .shared
            .reaper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = reaper {
            handle.abort();
        }
        self.release().await;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn waiter_count(&self) -> usize {
        self.shared.waiters.len()
    }

    /// Number of subscription connections opened over this multiplexer's lifetime
    pub fn connections_opened(&self) -> u64 {
        self.shared.connections_opened.load(Ordering::Relaxed)
    }

    fn start_reaper(&self) {
        if self
            .shared
            .reaper_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.max_connect_time;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.reap().await;
            }
        });

        *self.shared.reaper.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
