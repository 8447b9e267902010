//! JSON interop for the value domain.
//!
//! Embedders usually hold their model data as JSON; these conversions move
//! it in and out of the runtime's value types. Functions have no JSON
//! representation and convert to null.

use indexmap::IndexMap;
use serde_json::{Map, Number, Value as JsonValue};

use super::value::Value;

/// Convert a JSON value into a runtime value.
pub fn from_json(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::Str(s),
        JsonValue::Array(items) => Value::array(items.into_iter().map(from_json).collect()),
        JsonValue::Object(entries) => {
            let map: IndexMap<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect();
            Value::object(map)
        }
    }
}

/// Convert a runtime value into JSON. Undefined and functions become null;
/// non-finite numbers become null the way JSON serializers treat them.
/// Integral numbers render as JSON integers.
pub fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Undefined | Value::Null | Value::Function(_) => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => {
            if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                JsonValue::Number(Number::from(*n as i64))
            } else {
                Number::from_f64(*n)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            }
        }
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Array(arr) => JsonValue::Array(arr.borrow().iter().map(to_json).collect()),
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj.borrow().iter() {
                map.insert(k.clone(), to_json(v));
            }
            JsonValue::Object(map)
        }
    }
}
