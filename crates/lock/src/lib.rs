// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relock: a reentrant, lease-based distributed mutex
//!
//! Lock state lives in the remote store and only changes through two atomic
//! scripts. Contended callers park on a shared pub/sub subscription and retry
//! when a release is announced, or when the holder's lease would have run out.

mod error;
mod interrupt;
mod lock;
mod registry;
mod subscription;

#[cfg(test)]
mod test_support;

pub use error::LockError;
pub use interrupt::Interrupt;
pub use lock::{DistributedLock, ReleaseOutcome};
pub use registry::LockRegistry;
pub use subscription::SubscriptionMultiplexer;

pub use relock_core::{ContextId, LockConfig, OwnerKey};
