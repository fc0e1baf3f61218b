// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic lock scripts
//!
//! The two Lua scripts below are the entire wire contract with the store. The
//! lock key is a hash of `owner-key -> reentrant count` with a millisecond
//! expiry; both scripts run indivisibly relative to every other command on
//! that key.
//!
//! Acquire: `KEYS[1]` lock key, `ARGV[1]` lease ms, `ARGV[2]` owner key.
//! Returns nil when acquired, otherwise the key's remaining TTL in ms.
//!
//! Release: `KEYS[1]` lock key, `KEYS[2]` wake channel, `ARGV[1]` wake payload,
//! `ARGV[2]` lease ms, `ARGV[3]` owner key. Returns 1 when fully released (a
//! wake was published), 0 when still held reentrantly, nil when the owner
//! holds nothing.

use crate::owner::OwnerKey;
use std::time::Duration;
use thiserror::Error;

pub const ACQUIRE_SCRIPT: &str = "if (redis.call('exists', KEYS[1]) == 0) then \
redis.call('hset', KEYS[1], ARGV[2], 1); \
redis.call('pexpire', KEYS[1], ARGV[1]); \
return nil; \
end; \
if (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then \
redis.call('hincrby', KEYS[1], ARGV[2], 1); \
redis.call('pexpire', KEYS[1], ARGV[1]); \
return nil; \
end; \
return redis.call('pttl', KEYS[1]);";

// The unconditional publish on a missing key wakes waiters of a holder whose lease ran out.
pub const RELEASE_SCRIPT: &str = "if (redis.call('exists', KEYS[1]) == 0) then \
redis.call('publish', KEYS[2], ARGV[1]); \
return 1; \
end; \
if (redis.call('hexists', KEYS[1], ARGV[3]) == 0) then \
return nil; \
end; \
local counter = redis.call('hincrby', KEYS[1], ARGV[3], -1); \
if (counter > 0) then \
redis.call('pexpire', KEYS[1], ARGV[2]); \
return 0; \
else \
redis.call('del', KEYS[1]); \
redis.call('publish', KEYS[2], ARGV[1]); \
return 1; \
end; \
return nil;";

/// Which of the two scripts a call runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockScript {
    Acquire,
    Release,
}

impl LockScript {
    pub fn name(&self) -> &'static str {
        match self {
            LockScript::Acquire => "acquire",
            LockScript::Release => "release",
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            LockScript::Acquire => ACQUIRE_SCRIPT,
            LockScript::Release => RELEASE_SCRIPT,
        }
    }

    /// Number of `KEYS` entries the script expects
    pub fn key_count(&self) -> usize {
        match self {
            LockScript::Acquire => 1,
            LockScript::Release => 2,
        }
    }
}

/// A fully bound script invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptCall {
    pub script: LockScript,
    pub keys: Vec<String>,
    pub args: Vec<String>,
}

impl ScriptCall {
    pub fn acquire(key: &str, lease: Duration, owner: &OwnerKey) -> Self {
        Self {
            script: LockScript::Acquire,
            keys: vec![key.to_string()],
            args: vec![lease.as_millis().to_string(), owner.as_str().to_string()],
        }
    }

    pub fn release(
        key: &str,
        channel: &str,
        payload: &str,
        lease: Duration,
        owner: &OwnerKey,
    ) -> Self {
        Self {
            script: LockScript::Release,
            keys: vec![key.to_string(), channel.to_string()],
            args: vec![
                payload.to_string(),
                lease.as_millis().to_string(),
                owner.as_str().to_string(),
            ],
        }
    }
}

/// Raw script result as returned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Integer(i64),
}

/// A script returned something outside its contract
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("{script} script returned unexpected integer {value}")]
    UnexpectedInteger { script: &'static str, value: i64 },
}

/// Decoded result of the acquire script
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireReply {
    Acquired,
    /// Held by another owner. `ttl` is `None` when the key has no expiry.
    Contended { ttl: Option<Duration> },
}

impl AcquireReply {
    pub fn from_reply(reply: ScriptReply) -> Self {
        match reply {
            ScriptReply::Nil => AcquireReply::Acquired,
            // PTTL: -1 means no expiry, -2 means the key vanished under us
            ScriptReply::Integer(ms) if ms < 0 => AcquireReply::Contended { ttl: None },
            ScriptReply::Integer(ms) => AcquireReply::Contended {
                ttl: Some(Duration::from_millis(ms.unsigned_abs())),
            },
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireReply::Acquired)
    }
}

/// Decoded result of the release script
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseReply {
    /// Key deleted (or already gone) and a wake message published
    Released,
    /// Reentrant count decremented, caller still holds the lock
    StillHeld,
    /// Caller holds no entry in the lock
    NotHeld,
}

impl ReleaseReply {
    pub fn from_reply(reply: ScriptReply) -> Result<Self, ReplyError> {
        match reply {
            ScriptReply::Nil => Ok(ReleaseReply::NotHeld),
            ScriptReply::Integer(1) => Ok(ReleaseReply::Released),
            ScriptReply::Integer(0) => Ok(ReleaseReply::StillHeld),
            ScriptReply::Integer(value) => Err(ReplyError::UnexpectedInteger {
                script: LockScript::Release.name(),
                value,
            }),
        }
    }
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
