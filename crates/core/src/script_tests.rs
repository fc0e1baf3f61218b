// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::owner::ContextId;
use yare::parameterized;

fn owner() -> OwnerKey {
    OwnerKey::new("node", ContextId::new(3))
}

#[test]
fn acquire_call_binds_key_lease_and_owner() {
    let call = ScriptCall::acquire("orders", Duration::from_secs(30), &owner());

    assert_eq!(call.script, LockScript::Acquire);
    assert_eq!(call.keys, vec!["orders"]);
    assert_eq!(call.args, vec!["30000", "node:3"]);
    assert_eq!(call.keys.len(), call.script.key_count());
}

#[test]
fn release_call_binds_channel_payload_lease_and_owner() {
    let call = ScriptCall::release(
        "orders",
        "redis_lock_channel:orders",
        "0",
        Duration::from_millis(1500),
        &owner(),
    );

    assert_eq!(call.script, LockScript::Release);
    assert_eq!(call.keys, vec!["orders", "redis_lock_channel:orders"]);
    assert_eq!(call.args, vec!["0", "1500", "node:3"]);
    assert_eq!(call.keys.len(), call.script.key_count());
}

#[test]
fn scripts_reference_the_bound_argument_slots() {
    assert!(ACQUIRE_SCRIPT.contains("redis.call('hset', KEYS[1], ARGV[2], 1)"));
    assert!(ACQUIRE_SCRIPT.contains("redis.call('pexpire', KEYS[1], ARGV[1])"));
    assert!(ACQUIRE_SCRIPT.ends_with("return redis.call('pttl', KEYS[1]);"));

    assert!(RELEASE_SCRIPT.contains("redis.call('hincrby', KEYS[1], ARGV[3], -1)"));
    assert!(RELEASE_SCRIPT.contains("redis.call('publish', KEYS[2], ARGV[1])"));
    assert!(RELEASE_SCRIPT.contains("redis.call('pexpire', KEYS[1], ARGV[2])"));
}

#[test]
fn script_names_and_sources_match() {
    assert_eq!(LockScript::Acquire.name(), "acquire");
    assert_eq!(LockScript::Release.name(), "release");
    assert_eq!(LockScript::Acquire.source(), ACQUIRE_SCRIPT);
    assert_eq!(LockScript::Release.source(), RELEASE_SCRIPT);
}

#[parameterized(
    nil_is_acquired = { ScriptReply::Nil, AcquireReply::Acquired },
    ttl_is_contended = { ScriptReply::Integer(850), AcquireReply::Contended { ttl: Some(Duration::from_millis(850)) } },
    zero_ttl_is_contended = { ScriptReply::Integer(0), AcquireReply::Contended { ttl: Some(Duration::ZERO) } },
    no_expiry_has_no_ttl = { ScriptReply::Integer(-1), AcquireReply::Contended { ttl: None } },
    missing_key_has_no_ttl = { ScriptReply::Integer(-2), AcquireReply::Contended { ttl: None } },
)]
fn acquire_reply_decoding(reply: ScriptReply, expected: AcquireReply) {
    assert_eq!(AcquireReply::from_reply(reply), expected);
}

#[parameterized(
    one_is_released = { ScriptReply::Integer(1), ReleaseReply::Released },
    zero_is_still_held = { ScriptReply::Integer(0), ReleaseReply::StillHeld },
    nil_is_not_held = { ScriptReply::Nil, ReleaseReply::NotHeld },
)]
fn release_reply_decoding(reply: ScriptReply, expected: ReleaseReply) {
    assert_eq!(ReleaseReply::from_reply(reply), Ok(expected));
}

#[test]
fn release_reply_rejects_integers_outside_contract() {
    let err = ReleaseReply::from_reply(ScriptReply::Integer(7)).unwrap_err();
    assert_eq!(
        err,
        ReplyError::UnexpectedInteger {
            script: "release",
            value: 7
        }
    );
    assert_eq!(err.to_string(), "release script returned unexpected integer 7");
}

use proptest::prelude::*;

proptest! {
    #[test]
    fn any_non_negative_ttl_round_trips_as_milliseconds(ms in 0i64..i64::MAX) {
        let reply = AcquireReply::from_reply(ScriptReply::Integer(ms));
        prop_assert_eq!(reply, AcquireReply::Contended { ttl: Some(Duration::from_millis(ms as u64)) });
        prop_assert!(!reply.is_acquired());
    }
}
