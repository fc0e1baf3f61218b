// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value store capability consumed by the lock
//!
//! The lock needs exactly three things from the store: run one of the atomic
//! lock scripts, publish on a channel, and open a subscription connection.

#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "redis")]
pub use redis_store::RedisKvStore;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeKvStore, StoreCall};

use async_trait::async_trait;
use relock_core::{ScriptCall, ScriptReply};
use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("script error: {0}")]
    Script(String),
    /// The reply did not have the shape the script returns
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Remote key-value store
#[async_trait]
pub trait KvStore: Clone + Send + Sync + 'static {
    /// Run an atomic lock script
    async fn eval(&self, call: &ScriptCall) -> Result<ScriptReply, StoreError>;

    /// Publish `payload` on `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Open a dedicated connection subscribed to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn PubSubConnection>, StoreError>;
}

/// A live subscription to a single channel
#[async_trait]
pub trait PubSubConnection: Send {
    /// Wait for the next message body; `None` once the connection is closed or lost
    async fn next_message(&mut self) -> Option<String>;

    fn is_closed(&self) -> bool;

    /// Unsubscribe and return the connection
    async fn close(&mut self);
}
