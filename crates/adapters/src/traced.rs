// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced store wrapper for consistent observability

use crate::store::{KvStore, PubSubConnection, StoreError};
use async_trait::async_trait;
use relock_core::{ScriptCall, ScriptReply};
use tracing::Instrument;

/// Wrapper that adds tracing to any KvStore
#[derive(Clone)]
pub struct TracedKvStore<S> {
    inner: S,
}

impl<S> TracedKvStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: KvStore> KvStore for TracedKvStore<S> {
    async fn eval(&self, call: &ScriptCall) -> Result<ScriptReply, StoreError> {
        let key = call.keys.first().map(String::as_str).unwrap_or_default();
        let span = tracing::info_span!("store.eval", script = call.script.name(), key);

        async {
            // Precondition: the script reads exactly this many KEYS
            if call.keys.len() != call.script.key_count() {
                tracing::error!(
                    expected = call.script.key_count(),
                    actual = call.keys.len(),
                    "wrong number of keys"
                );
                return Err(StoreError::Script(format!(
                    "{} script expects {} keys, got {}",
                    call.script.name(),
                    call.script.key_count(),
                    call.keys.len()
                )));
            }

            let start = std::time::Instant::now();
            let result = self.inner.eval(call).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(reply) => tracing::debug!(
                    ?reply,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "script done"
                ),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "script failed"
                ),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let span = tracing::info_span!("store.publish", channel);

        async {
            let result = self.inner.publish(channel, payload).await;
            match &result {
                Ok(()) => tracing::debug!(payload_len = payload.len(), "published"),
                Err(e) => tracing::warn!(error = %e, "publish failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn PubSubConnection>, StoreError> {
        let span = tracing::info_span!("store.subscribe", channel);

        async {
            tracing::info!("opening subscription connection");

            let start = std::time::Instant::now();
            let result = self.inner.subscribe(channel).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(_) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "subscribed"),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "subscribe failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
