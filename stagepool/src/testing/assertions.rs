//! Test assertions for stage output.

use std::fmt::Debug;

use crate::core::StageMessage;

/// Asserts that `messages` ends with exactly one sentinel and contains no other.
pub fn assert_single_trailing_sentinel<W, R>(messages: &[StageMessage<W, R>]) {
    let sentinels = messages.iter().filter(|m| m.is_sentinel()).count();
    assert_eq!(sentinels, 1, "Expected exactly one sentinel, got {sentinels}");
    assert!(
        messages.last().is_some_and(StageMessage::is_sentinel),
        "Expected the sentinel to be the last message"
    );
}

/// Asserts that a result from `capability` exists for `unit`.
pub fn assert_has_result<W, R>(messages: &[StageMessage<W, R>], capability: &str, unit: &W)
where
    W: PartialEq + Debug,
{
    let found = messages
        .iter()
        .filter_map(StageMessage::as_result)
        .any(|r| r.capability == capability && &r.unit == unit);
    assert!(found, "Expected a result from '{capability}' for {unit:?}");
}

/// Asserts that a failure report from `capability` exists for `unit`.
pub fn assert_has_failure<W, R>(messages: &[StageMessage<W, R>], capability: &str, unit: &W)
where
    W: PartialEq + Debug,
{
    let found = messages
        .iter()
        .filter_map(StageMessage::as_failure)
        .any(|f| f.capability == capability && &f.unit == unit);
    assert!(found, "Expected a failure from '{capability}' for {unit:?}");
}

/// Asserts that no message refers to `unit`.
pub fn assert_unit_absent<W, R>(messages: &[StageMessage<W, R>], unit: &W)
where
    W: PartialEq + Debug,
{
    assert!(
        messages.iter().all(|m| m.unit() != Some(unit)),
        "Expected no message for {unit:?}"
    );
}
