// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relock-core: I/O-free building blocks for the relock distributed mutex
//!
//! This crate provides:
//! - Clock and ID abstractions so lease and identity logic is testable
//! - Owner identity (`ContextId`, `OwnerKey`) used as the store-side hash field
//! - The two atomic scripts that form the wire contract with the store
//! - `LockConfig`, loadable from TOML

pub mod clock;
pub mod config;
pub mod id;
pub mod owner;
pub mod script;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, LockConfig};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use owner::{ContextId, OwnerKey};
pub use script::{
    AcquireReply, LockScript, ReleaseReply, ReplyError, ScriptCall, ScriptReply,
    ACQUIRE_SCRIPT, RELEASE_SCRIPT,
};
