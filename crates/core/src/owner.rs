// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner identity
//!
//! A lock hold belongs to one logical caller of one lock instance. The caller
//! is named by a [`ContextId`] that it keeps for the whole hold/wait; the
//! instance contributes its random ID. Together they form the [`OwnerKey`]
//! stored as the hash field on the store side.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical caller (a thread or a task)
///
/// Must stay the same between `lock` and the matching `unlock`; two
/// concurrent callers must never share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl ContextId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a process-unique context ID
    pub fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `<instance-id>:<context-id>`, the hash field a holder writes into the lock key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey(String);

impl OwnerKey {
    pub fn new(instance_id: &str, context: ContextId) -> Self {
        Self(format!("{}:{}", instance_id, context))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
