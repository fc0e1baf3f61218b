// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store wrappers shared by this crate's tests

use async_trait::async_trait;
use relock_adapters::{FakeKvStore, KvStore, PubSubConnection, StoreError};
use relock_core::{ScriptCall, ScriptReply};
use std::time::Duration;

/// [`FakeKvStore`] whose `subscribe` takes `delay` before connecting
#[derive(Clone)]
pub(crate) struct SlowSubscribeStore {
    pub(crate) inner: FakeKvStore,
    delay: Duration,
}

impl SlowSubscribeStore {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            inner: FakeKvStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl KvStore for SlowSubscribeStore {
    async fn eval(&self, call: &ScriptCall) -> Result<ScriptReply, StoreError> {
        self.inner.eval(call).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn PubSubConnection>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.subscribe(channel).await
    }
}
