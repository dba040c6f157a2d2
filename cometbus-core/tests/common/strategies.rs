// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable strategies for plain JSON values.

use proptest::prelude::*;
use serde_json::{Map, Number, Value};

/// Object keys that never collide with envelope tags.
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9_]{0,11}"
}

/// JSON numbers: integers of either sign and finite floats.
pub fn number_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|i| Value::Number(Number::from(i))),
        any::<u64>().prop_map(|u| Value::Number(Number::from(u))),
        (-1.0e12f64..1.0e12f64)
            .prop_filter_map("finite", Number::from_f64)
            .prop_map(Value::Number),
    ]
}

/// Scalar JSON leaves.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        number_strategy(),
        "[^\\^]{0,20}".prop_map(Value::String),
    ]
}

/// Arbitrary plain JSON documents up to a few levels deep.
pub fn plain_json_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec((key_strategy(), inner), 0..6).prop_map(|entries| {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k, v);
                }
                Value::Object(map)
            }),
        ]
    })
}

/// Plain JSON arrays.
pub fn plain_array_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(plain_json_strategy(), 0..8).prop_map(Value::Array)
}
