// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed store

use super::{KvStore, PubSubConnection, StoreError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use relock_core::{LockScript, ScriptCall, ScriptReply};
use std::sync::Arc;

/// Store adapter over a Redis server
///
/// Scripts and publishes share one multiplexed connection; every
/// subscription gets its own dedicated pub/sub connection. Both scripts are
/// hashed once at connect and invoked by SHA, falling back to a full `EVAL`
/// when the server has not cached them yet.
#[derive(Clone)]
pub struct RedisKvStore {
    client: redis::Client,
    connection: MultiplexedConnection,
    scripts: Arc<LockScripts>,
}

struct LockScripts {
    acquire: redis::Script,
    release: redis::Script,
}

impl LockScripts {
    fn new() -> Self {
        Self {
            acquire: redis::Script::new(LockScript::Acquire.source()),
            release: redis::Script::new(LockScript::Release.source()),
        }
    }

    fn get(&self, script: LockScript) -> &redis::Script {
        match script {
            LockScript::Acquire => &self.acquire,
            LockScript::Release => &self.release,
        }
    }
}

impl RedisKvStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1/`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        Ok(Self {
            client,
            connection,
            scripts: Arc::new(LockScripts::new()),
        })
    }
}

fn connection_error(e: redis::RedisError) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn script_error(e: redis::RedisError) -> StoreError {
    match e.kind() {
        redis::ErrorKind::TypeError => StoreError::UnexpectedReply(e.to_string()),
        redis::ErrorKind::IoError => StoreError::Connection(e.to_string()),
        _ => StoreError::Script(e.to_string()),
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn eval(&self, call: &ScriptCall) -> Result<ScriptReply, StoreError> {
        let mut invocation = self.scripts.get(call.script).prepare_invoke();
        for key in &call.keys {
            invocation.key(key);
        }
        for arg in &call.args {
            invocation.arg(arg);
        }

        let mut connection = self.connection.clone();
        let reply: Option<i64> = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(script_error)?;

        Ok(match reply {
            None => ScriptReply::Nil,
            Some(value) => ScriptReply::Integer(value),
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _receivers: i64 = connection
            .publish(channel, payload)
            .await
            .map_err(connection_error)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn PubSubConnection>, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(connection_error)?;
        pubsub.subscribe(channel).await.map_err(connection_error)?;
        Ok(Box::new(RedisSubscription {
            messages: Some(pubsub.into_on_message().boxed()),
        }))
    }
}

/// Dedicated pub/sub connection; dropping the stream closes the socket
struct RedisSubscription {
    messages: Option<BoxStream<'static, redis::Msg>>,
}

#[async_trait]
impl PubSubConnection for RedisSubscription {
    async fn next_message(&mut self) -> Option<String> {
        loop {
            let messages = self.messages.as_mut()?;
            match messages.next().await {
                Some(msg) => match msg.get_payload::<String>() {
                    Ok(payload) => return Some(payload),
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable pub/sub payload"),
                },
                None => {
                    self.messages = None;
                    return None;
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.messages.is_none()
    }

    async fn close(&mut self) {
        self.messages = None;
    }
}

#[cfg(test)]
#[path = "redis_store_tests.rs"]
mod tests;
