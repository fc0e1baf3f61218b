// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External interruption of blocking lock calls

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable interrupt flag
///
/// Passing one to an interruptible lock call makes the call give up with
/// `LockError::Interrupted` as soon as `interrupt()` is called, from any clone.
/// The flag stays set until `reset()`.
#[derive(Clone, Debug)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn interrupt(&self) {
        self.flag.send_replace(true);
    }

    pub fn reset(&self) {
        self.flag.send_replace(false);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the flag is set
    pub async fn interrupted(&self) {
        let mut rx = self.flag.subscribe();
        let set = rx.wait_for(|interrupted| *interrupted).await.map(|_| ());
        if set.is_err() {
            // Sender lives as long as self, so this is unreachable in practice
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
