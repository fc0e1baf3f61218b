// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for lock operations

use relock_adapters::StoreError;
use relock_core::ReplyError;
use thiserror::Error;

/// Errors that can occur while locking or unlocking
///
/// Running out of wait budget is not an error; `try_lock*` return `Ok(false)`.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("attempt to unlock {name}, not locked by owner {owner}")]
    NotHeld { name: String, owner: String },
    #[error("interrupted while waiting for lock")]
    Interrupted,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("subscription state inconsistent: {0}")]
    SubscriptionState(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
}
