// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envelope Codec
//!
//! Converts between the bus's tagged envelope JSON and the plain JSON that
//! REST clients and servers exchange.
//!
//! Envelope to plain:
//! - `^ObjectID` and `^EncodedType` tags are stripped from every object
//! - a repeated object id is a back-reference and resolves to the first
//!   occurrence's decoded value
//! - `{"^NumValue": "1"}` becomes `1`
//! - `{"^Value": [..]}` becomes the array; date-typed qualified values become
//!   epoch milliseconds
//! - `{"^EnumStringValue": "MALE"}` becomes `"MALE"`
//! - keys prefixed with `^EmbeddedJSON` carry a JSON literal that is decoded
//!   and used as the key
//!
//! Plain to envelope assigns increasing object ids to every object, number and
//! array, wrapping numbers and arrays. The two directions are not inverses in
//! general (type and date tags exist only on the envelope side).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub const OBJECT_ID: &str = "^ObjectID";
pub const ENCODED_TYPE: &str = "^EncodedType";
pub const NUMERIC_VALUE: &str = "^NumValue";
pub const QUALIFIED_VALUE: &str = "^Value";
pub const ENUM_STRING_VALUE: &str = "^EnumStringValue";
pub const EMBEDDED_JSON: &str = "^EmbeddedJSON";

/// Object id meaning "not a reference target".
pub const NO_OBJECT_ID: &str = "-1";

/// Encoded types whose qualified value is a date.
const DATE_TYPES: &[&str] = &[
    "java.util.Date",
    "java.sql.Date",
    "java.sql.Time",
    "java.sql.Timestamp",
];

/// Errors from envelope conversion.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Input is not valid JSON.
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("object id must be a string or number, got {0}")]
    InvalidObjectId(String),

    #[error("invalid numeric value: {0}")]
    InvalidNumber(String),

    #[error("invalid date value: {0}")]
    InvalidDate(String),

    /// A back-reference points at an object that contains it.
    #[error("cyclic reference to object {0}")]
    CyclicReference(String),
}

/// Converts envelope JSON text to plain JSON text.
pub fn to_plain(envelope_json: &str) -> Result<String, CodecError> {
    let value: Value = serde_json::from_str(envelope_json)?;
    Ok(to_plain_value(value)?.to_string())
}

/// Converts an envelope value to a plain value.
pub fn to_plain_value(value: Value) -> Result<Value, CodecError> {
    PlainDecoder::default().decode(value)
}

/// Converts plain JSON text to envelope JSON text.
pub fn to_envelope(plain_json: &str) -> Result<String, CodecError> {
    let value: Value = serde_json::from_str(plain_json)?;
    Ok(to_envelope_value(value).to_string())
}

/// Converts a plain value to an envelope value. Object ids start at 1.
pub fn to_envelope_value(value: Value) -> Value {
    EnvelopeEncoder::default().encode(value)
}

enum Slot {
    /// Object is being decoded; a reference to it now is a cycle.
    Pending,
    Resolved(Value),
}

#[derive(Default)]
struct PlainDecoder {
    objects: HashMap<String, Slot>,
}

impl PlainDecoder {
    fn decode(&mut self, value: Value) -> Result<Value, CodecError> {
        match value {
            Value::Object(map) => self.decode_object(map),
            Value::Array(items) => self.decode_array(items),
            other => Ok(other),
        }
    }

    fn decode_array(&mut self, items: Vec<Value>) -> Result<Value, CodecError> {
        items
            .into_iter()
            .map(|item| self.decode(item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn decode_object(&mut self, map: Map<String, Value>) -> Result<Value, CodecError> {
        let mut object_id = None;
        let mut encoded_type = None;
        let mut fields = Map::new();

        for (key, value) in map {
            match key.as_str() {
                OBJECT_ID => object_id = Some(value),
                ENCODED_TYPE => encoded_type = Some(value),
                _ => {
                    fields.insert(key, value);
                }
            }
        }

        let object_id = object_id
            .map(|v| object_id_string(&v))
            .transpose()?
            .filter(|id| id != NO_OBJECT_ID);

        if let Some(id) = &object_id {
            match self.objects.get(id) {
                Some(Slot::Resolved(value)) => return Ok(value.clone()),
                Some(Slot::Pending) => return Err(CodecError::CyclicReference(id.clone())),
                None => {
                    self.objects.insert(id.clone(), Slot::Pending);
                }
            }
        }

        let encoded_type = encoded_type.as_ref().and_then(Value::as_str);
        let decoded = self.decode_fields(fields, encoded_type)?;

        if let Some(id) = object_id {
            self.objects.insert(id, Slot::Resolved(decoded.clone()));
        }
        Ok(decoded)
    }

    fn decode_fields(
        &mut self,
        mut fields: Map<String, Value>,
        encoded_type: Option<&str>,
    ) -> Result<Value, CodecError> {
        if let Some(value) = fields.remove(QUALIFIED_VALUE) {
            return self.decode_qualified(value, encoded_type);
        }
        if let Some(value) = fields.remove(NUMERIC_VALUE) {
            return decode_numeric(value);
        }
        if let Some(value) = fields.remove(ENUM_STRING_VALUE) {
            return Ok(value);
        }

        let mut plain = Map::with_capacity(fields.len());
        for (key, value) in fields {
            let key = match key.strip_prefix(EMBEDDED_JSON) {
                Some(literal) => self.decode_embedded_key(literal)?,
                None => key,
            };
            plain.insert(key, self.decode(value)?);
        }
        Ok(Value::Object(plain))
    }

    fn decode_qualified(
        &mut self,
        value: Value,
        encoded_type: Option<&str>,
    ) -> Result<Value, CodecError> {
        match value {
            Value::Array(items) => self.decode_array(items),
            other if encoded_type.is_some_and(|t| DATE_TYPES.contains(&t)) => decode_date(other),
            other => self.decode(other),
        }
    }

    fn decode_embedded_key(&mut self, literal: &str) -> Result<String, CodecError> {
        let key: Value = serde_json::from_str(literal)?;
        Ok(match self.decode(key)? {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

fn object_id_string(value: &Value) -> Result<String, CodecError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CodecError::InvalidObjectId(other.to_string())),
    }
}

fn decode_numeric(value: Value) -> Result<Value, CodecError> {
    match value {
        Value::String(s) => parse_number(&s)
            .map(Value::Number)
            .ok_or(CodecError::InvalidNumber(s)),
        number @ Value::Number(_) => Ok(number),
        other => Err(CodecError::InvalidNumber(other.to_string())),
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Some(Number::from(u));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Converts a date value to epoch milliseconds.
///
/// Accepts epoch digits, RFC 3339, a naive ISO datetime (taken as UTC) or an
/// ISO date (midnight UTC).
fn decode_date(value: Value) -> Result<Value, CodecError> {
    let text = match value {
        number @ Value::Number(_) => return Ok(number),
        Value::String(s) => s,
        other => return Err(CodecError::InvalidDate(other.to_string())),
    };

    if let Some(number) = parse_number(&text) {
        return Ok(Value::Number(number));
    }

    let trimmed = text.trim();
    let millis = DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.timestamp_millis())
        .or_else(|_| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|dt| dt.and_utc().timestamp_millis())
        })
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis())
        })
        .ok_or_else(|| CodecError::InvalidDate(trimmed.to_string()))?;

    Ok(Value::Number(Number::from(millis)))
}

#[derive(Default)]
struct EnvelopeEncoder {
    last_id: u64,
}

impl EnvelopeEncoder {
    fn next_id(&mut self) -> Value {
        self.last_id += 1;
        Value::String(self.last_id.to_string())
    }

    fn encode(&mut self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut envelope = Map::with_capacity(map.len() + 1);
                envelope.insert(OBJECT_ID.to_string(), self.next_id());
                for (key, value) in map {
                    if key == OBJECT_ID {
                        continue;
                    }
                    let encoded = self.encode(value);
                    envelope.insert(key, encoded);
                }
                Value::Object(envelope)
            }
            Value::Number(number) => {
                let mut envelope = Map::with_capacity(2);
                envelope.insert(OBJECT_ID.to_string(), self.next_id());
                envelope.insert(NUMERIC_VALUE.to_string(), Value::Number(number));
                Value::Object(envelope)
            }
            Value::Array(items) => {
                let mut envelope = Map::with_capacity(2);
                // The array takes its id before its elements.
                envelope.insert(OBJECT_ID.to_string(), self.next_id());
                let items = items.into_iter().map(|item| self.encode(item)).collect();
                envelope.insert(QUALIFIED_VALUE.to_string(), Value::Array(items));
                Value::Object(envelope)
            }
            other => other,
        }
    }
}

// INLINE_TEST_REQUIRED: Tests private number and date parsing helpers
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_number_prefers_integers() {
        assert_eq!(parse_number("42"), Some(Number::from(42)));
        assert_eq!(parse_number(" -7 "), Some(Number::from(-7)));
        assert_eq!(
            parse_number("18446744073709551615"),
            Some(Number::from(u64::MAX))
        );
        assert_eq!(parse_number("1.5"), Number::from_f64(1.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_decode_date_formats() {
        assert_eq!(
            decode_date(json!("1700000000000")).unwrap(),
            json!(1700000000000i64)
        );
        assert_eq!(
            decode_date(json!("1970-01-01T00:00:01Z")).unwrap(),
            json!(1000)
        );
        assert_eq!(
            decode_date(json!("1970-01-01T01:00:00+01:00")).unwrap(),
            json!(0)
        );
        assert_eq!(
            decode_date(json!("1970-01-02T00:00:00.250")).unwrap(),
            json!(86_400_250)
        );
        assert_eq!(decode_date(json!("1970-01-02")).unwrap(), json!(86_400_000));
        assert_eq!(decode_date(json!(5)).unwrap(), json!(5));
        assert!(matches!(
            decode_date(json!("yesterday")),
            Err(CodecError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_encoder_ids_are_preorder() {
        let encoded = to_envelope_value(json!({"a": [1], "b": 2}));
        assert_eq!(
            encoded,
            json!({
                "^ObjectID": "1",
                "a": {"^ObjectID": "2", "^Value": [{"^ObjectID": "3", "^NumValue": 1}]},
                "b": {"^ObjectID": "4", "^NumValue": 2}
            })
        );
    }
}
