// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named lock factory

use crate::error::LockError;
use crate::lock::DistributedLock;
use relock_adapters::KvStore;
use relock_core::LockConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Hands out one shared [`DistributedLock`] per name
///
/// Every caller asking for the same name gets the same instance, so they
/// share its owner identity space and its subscription connection.
pub struct LockRegistry<S: KvStore> {
    store: S,
    config: LockConfig,
    locks: Mutex<HashMap<String, Arc<DistributedLock<S>>>>,
}

impl<S: KvStore> LockRegistry<S> {
    pub fn new(store: S, config: LockConfig) -> Result<Self, LockError> {
        config
            .validate()
            .map_err(|e| LockError::InvalidArgument(e.to_string()))?;
        Ok(Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_lock(&self, name: &str) -> Result<Arc<DistributedLock<S>>, LockError> {
        let mut locks = self.locks();
        if let Some(lock) = locks.get(name) {
            return Ok(Arc::clone(lock));
        }

        let lock = Arc::new(DistributedLock::new(
            self.store.clone(),
            name,
            self.config.clone(),
        )?);
        debug!(lock = name, instance = lock.instance_id(), "lock created");
        locks.insert(name.to_string(), Arc::clone(&lock));
        Ok(lock)
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.locks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks().is_empty()
    }

    /// Names of every lock handed out so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locks().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every lock's subscription connection and stop its reaper
    pub async fn shutdown(&self) {
        let locks: Vec<_> = self.locks().values().cloned().collect();
        for lock in locks {
            lock.subscription().shutdown().await;
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<DistributedLock<S>>>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
