//! EJSON decoder.
//!
//! Shapes are tried in a fixed order: integer, float, string, bool,
//! the `$date` object, plain object, array. `null` is accepted last so a
//! single null field does not fail a whole document.

use crate::error::{EjsonError, EjsonResult};
use crate::value::{date_from_millis, EjsonValue, Fields, DATE_KEY};
use serde_json::{Map, Number, Value};

/// Decode an EJSON value from JSON text.
///
/// # Errors
///
/// Returns an error if the text is not valid JSON or holds a `$date`
/// outside the representable range.
pub fn from_json_str(text: &str) -> EjsonResult<EjsonValue> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| EjsonError::invalid_json(e.to_string()))?;
    from_json_value(&json)
}

/// Decode an EJSON value from a parsed JSON value.
pub fn from_json_value(json: &Value) -> EjsonResult<EjsonValue> {
    match json {
        Value::Number(n) => Ok(decode_number(n)),
        Value::String(s) => Ok(EjsonValue::String(s.clone())),
        Value::Bool(b) => Ok(EjsonValue::Bool(*b)),
        Value::Object(map) => {
            if let Some(date) = decode_date(map)? {
                return Ok(date);
            }
            decode_object(map).map(EjsonValue::Object)
        }
        Value::Array(items) => items
            .iter()
            .map(from_json_value)
            .collect::<EjsonResult<Vec<_>>>()
            .map(EjsonValue::Array),
        Value::Null => Ok(EjsonValue::Null),
    }
}

/// Decode a flat document. The JSON value must be an object.
pub fn fields_from_json(json: &Value) -> EjsonResult<Fields> {
    match json {
        Value::Object(map) => decode_object(map),
        other => Err(EjsonError::type_mismatch("object", json_type_name(other))),
    }
}

/// Returns true if the object is exactly the extended date shape.
pub fn is_date_shape(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get(DATE_KEY).is_some_and(Value::is_number)
}

fn decode_number(n: &Number) -> EjsonValue {
    if let Some(i) = n.as_i64() {
        return EjsonValue::Int(i);
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    // Integral floats still decode as integers when they fit.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        #[allow(clippy::cast_possible_truncation)]
        return EjsonValue::Int(f as i64);
    }
    EjsonValue::Float(f)
}

fn decode_date(map: &Map<String, Value>) -> EjsonResult<Option<EjsonValue>> {
    if !is_date_shape(map) {
        return Ok(None);
    }
    let millis = map
        .get(DATE_KEY)
        .and_then(Value::as_f64)
        .ok_or_else(|| EjsonError::type_mismatch("number", "non-number $date"))?;
    date_from_millis(millis)
        .map(|d| Some(EjsonValue::Date(d)))
        .ok_or_else(|| EjsonError::InvalidDate {
            millis: millis.to_string(),
        })
}

fn decode_object(map: &Map<String, Value>) -> EjsonResult<Fields> {
    map.iter()
        .map(|(k, v)| from_json_value(v).map(|v| (k.clone(), v)))
        .collect()
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
