// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store for testing
//!
//! Executes both lock scripts natively under one mutex, so they are exactly as
//! atomic as on the real store. Key expiry follows the injected [`Clock`].
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{KvStore, PubSubConnection, StoreError};
use async_trait::async_trait;
use relock_core::{Clock, LockScript, ScriptCall, ScriptReply, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Eval {
        script: LockScript,
        keys: Vec<String>,
        args: Vec<String>,
    },
    Publish {
        channel: String,
        payload: String,
    },
    Subscribe {
        channel: String,
    },
}

/// A lock key: hash of owner -> count with an optional deadline
#[derive(Debug, Clone, Default)]
struct HashEntry {
    fields: HashMap<String, i64>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct FakeState {
    keys: HashMap<String, HashEntry>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    published: Vec<(String, String)>,
    calls: Vec<StoreCall>,
    eval_failures: Vec<StoreError>,
    subscribe_failures: Vec<StoreError>,
    subscriptions_opened: u64,
}

impl FakeState {
    fn purge_expired(&mut self, key: &str, clock: &impl Clock) {
        let expired = self
            .keys
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| clock.has_passed(deadline));
        if expired {
            self.keys.remove(key);
        }
    }

    /// PTTL semantics: -2 missing, -1 no expiry, otherwise remaining ms
    fn pttl(&self, key: &str, clock: &impl Clock) -> i64 {
        match self.keys.get(key) {
            None => -2,
            Some(HashEntry {
                expires_at: None, ..
            }) => -1,
            Some(HashEntry {
                expires_at: Some(deadline),
                ..
            }) => {
                let remaining = clock.remaining_until(*deadline).as_millis();
                i64::try_from(remaining).unwrap_or(i64::MAX)
            }
        }
    }

    fn publish(&mut self, channel: &str, payload: &str) {
        self.published
            .push((channel.to_string(), payload.to_string()));
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
    }

    fn acquire(&mut self, call: &ScriptCall, clock: &impl Clock) -> Result<ScriptReply, StoreError> {
        let key = arg(&call.keys, 0)?;
        let lease = lease_arg(&call.args, 0)?;
        let owner = arg(&call.args, 1)?;

        self.purge_expired(key, clock);
        let entry = self.keys.entry(key.to_string()).or_default();
        if entry.fields.is_empty() {
            entry.fields.insert(owner.to_string(), 1);
            entry.expires_at = Some(clock.deadline_after(lease));
            return Ok(ScriptReply::Nil);
        }
        if let Some(counter) = entry.fields.get_mut(owner) {
            *counter += 1;
            entry.expires_at = Some(clock.deadline_after(lease));
            return Ok(ScriptReply::Nil);
        }
        Ok(ScriptReply::Integer(self.pttl(key, clock)))
    }

    fn release(&mut self, call: &ScriptCall, clock: &impl Clock) -> Result<ScriptReply, StoreError> {
        let key = arg(&call.keys, 0)?;
        let channel = arg(&call.keys, 1)?;
        let payload = arg(&call.args, 0)?;
        let lease = lease_arg(&call.args, 1)?;
        let owner = arg(&call.args, 2)?;

        self.purge_expired(key, clock);
        if !self.keys.contains_key(key) {
            self.publish(channel, payload);
            return Ok(ScriptReply::Integer(1));
        }
        let remaining = match self
            .keys
            .get_mut(key)
            .and_then(|entry| entry.fields.get_mut(owner))
        {
            None => return Ok(ScriptReply::Nil),
            Some(counter) => {
                *counter -= 1;
                *counter
            }
        };
        if remaining > 0 {
            if let Some(entry) = self.keys.get_mut(key) {
                entry.expires_at = Some(clock.deadline_after(lease));
            }
            return Ok(ScriptReply::Integer(0));
        }
        self.keys.remove(key);
        self.publish(channel, payload);
        Ok(ScriptReply::Integer(1))
    }
}

fn arg<'a>(values: &'a [String], index: usize) -> Result<&'a str, StoreError> {
    values
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Script(format!("missing argument {}", index + 1)))
}

fn lease_arg(values: &[String], index: usize) -> Result<Duration, StoreError> {
    let raw = arg(values, index)?;
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| StoreError::Script(format!("invalid expire time '{}'", raw)))
}

/// In-memory store for testing
#[derive(Clone)]
pub struct FakeKvStore<C: Clock = SystemClock> {
    state: Arc<Mutex<FakeState>>,
    clock: C,
}

impl FakeKvStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FakeKvStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FakeKvStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            clock,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    /// Number of recorded script evaluations
    pub fn eval_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, StoreCall::Eval { .. }))
            .count()
    }

    /// Every `(channel, payload)` published, including from scripts
    pub fn published(&self) -> Vec<(String, String)> {
        self.state().published.clone()
    }

    pub fn exists(&self, key: &str) -> bool {
        let mut state = self.state();
        state.purge_expired(key, &self.clock);
        state.keys.contains_key(key)
    }

    /// Reentrant count per owner for `key`
    pub fn holders(&self, key: &str) -> HashMap<String, i64> {
        let mut state = self.state();
        state.purge_expired(key, &self.clock);
        state
            .keys
            .get(key)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default()
    }

    /// Remaining TTL in ms, with PTTL's -2/-1 conventions
    pub fn pttl(&self, key: &str) -> i64 {
        let mut state = self.state();
        state.purge_expired(key, &self.clock);
        state.pttl(key, &self.clock)
    }

    /// Write a holder directly, bypassing the scripts. `ttl: None` persists the key.
    pub fn insert_holder(&self, key: &str, owner: &str, count: i64, ttl: Option<Duration>) {
        let mut state = self.state();
        let entry = state.keys.entry(key.to_string()).or_default();
        entry.fields.insert(owner.to_string(), count);
        entry.expires_at = ttl.map(|ttl| self.clock.deadline_after(ttl));
    }

    pub fn delete(&self, key: &str) {
        self.state().keys.remove(key);
    }

    /// Open subscriptions on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map(|subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total subscription connections ever opened
    pub fn subscriptions_opened(&self) -> u64 {
        self.state().subscriptions_opened
    }

    /// Sever every subscription connection, as if the server dropped them
    pub fn drop_connections(&self) {
        self.state().channels.clear();
    }

    /// Make the next `eval` fail with `error`
    pub fn fail_next_eval(&self, error: StoreError) {
        self.state().eval_failures.push(error);
    }

    /// Make the next `subscribe` fail with `error`
    pub fn fail_next_subscribe(&self, error: StoreError) {
        self.state().subscribe_failures.push(error);
    }
}

#[async_trait]
impl<C: Clock> KvStore for FakeKvStore<C> {
    async fn eval(&self, call: &ScriptCall) -> Result<ScriptReply, StoreError> {
        let mut state = self.state();
        state.calls.push(StoreCall::Eval {
            script: call.script,
            keys: call.keys.clone(),
            args: call.args.clone(),
        });
        if let Some(error) = state.eval_failures.pop() {
            return Err(error);
        }
        match call.script {
            LockScript::Acquire => state.acquire(call, &self.clock),
            LockScript::Release => state.release(call, &self.clock),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        state.calls.push(StoreCall::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        state.publish(channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn PubSubConnection>, StoreError> {
        let mut state = self.state();
        state.calls.push(StoreCall::Subscribe {
            channel: channel.to_string(),
        });
        if let Some(error) = state.subscribe_failures.pop() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        state.subscriptions_opened += 1;
        Ok(Box::new(FakeSubscription { rx, closed: false }))
    }
}

/// Subscription handed out by [`FakeKvStore`]
struct FakeSubscription {
    rx: mpsc::UnboundedReceiver<String>,
    closed: bool,
}

#[async_trait]
impl PubSubConnection for FakeSubscription {
    async fn next_message(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        let message = self.rx.recv().await;
        if message.is_none() {
            self.closed = true;
        }
        message
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
