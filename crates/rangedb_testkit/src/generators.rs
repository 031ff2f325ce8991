//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values, ranges and sequences of
//! mutations, plus a model to check collections against.

use crate::fixtures::TestValue;
use rangedb_core::{Collection, CoreResult, Key, Range};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for long keys in `[0, max]`.
pub fn long_key_strategy(max: i64) -> impl Strategy<Value = Key> {
    (0..=max).prop_map(Key::Long)
}

/// Strategy for time keys with a short id and a time in `[0, max_time]`.
pub fn time_key_strategy(max_time: i64) -> impl Strategy<Value = Key> {
    ("[a-z]{1,4}", 0..=max_time).prop_map(|(id, time)| Key::time(id, time))
}

/// Strategy for time-frame keys starting in `[0, max_start]` and lasting
/// at most `max_len`.
pub fn time_frame_key_strategy(max_start: i64, max_len: i64) -> impl Strategy<Value = Key> {
    ("[a-z]{1,4}", 0..=max_start, 0..=max_len).prop_map(|(id, start, len)| {
        Key::time_frame(id, start, start + len).expect("end is never before start")
    })
}

/// Strategy for string keys.
pub fn string_key_strategy() -> impl Strategy<Value = Key> {
    "[a-zA-Z0-9_]{1,16}".prop_map(Key::String)
}

/// Strategy for [`TestValue`]s.
pub fn test_value_strategy() -> impl Strategy<Value = TestValue> {
    (
        "[a-z]{0,8}",
        any::<i64>(),
        prop::collection::vec("[a-z]{1,4}", 0..3),
    )
        .prop_map(|(name, count, tags)| TestValue { name, count, tags })
}

/// Strategy for ranges inside `[-bound, bound]`.
pub fn range_strategy(bound: i64) -> impl Strategy<Value = Range> {
    (-bound..=bound, -bound..=bound).prop_map(|(a, b)| Range::new(a, b))
}

/// One mutation of a long-keyed collection.
#[derive(Debug, Clone)]
pub enum Op {
    /// Insert or overwrite.
    Upsert(i64, TestValue),
    /// Delete, possibly of a missing key.
    Delete(i64),
}

/// Strategy for sequences of up to `len` mutations over keys `[0, max_key]`.
pub fn op_sequence_strategy(max_key: i64, len: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => (0..=max_key, test_value_strategy()).prop_map(|(k, v)| Op::Upsert(k, v)),
        1 => (0..=max_key).prop_map(Op::Delete),
    ];
    prop::collection::vec(op, 0..len)
}

/// Applies `op` to both a collection and its `BTreeMap` model.
///
/// # Errors
///
/// Returns the collection's error; the model is updated regardless.
pub fn apply_op(
    collection: &Collection<TestValue>,
    model: &mut BTreeMap<i64, TestValue>,
    op: &Op,
) -> CoreResult<()> {
    match op {
        Op::Upsert(key, value) => {
            model.insert(*key, value.clone());
            collection.batch_upsert([(Key::Long(*key), value.clone())])
        }
        Op::Delete(key) => {
            model.remove(key);
            collection.delete(&Key::Long(*key))
        }
    }
}

/// The model's contents as `(key, value)` pairs in key order.
pub fn model_entities(model: &BTreeMap<i64, TestValue>) -> Vec<(Key, TestValue)> {
    model
        .iter()
        .map(|(k, v)| (Key::Long(*k), v.clone()))
        .collect()
}
