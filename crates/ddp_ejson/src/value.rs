//! Dynamic EJSON value type.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Key used on the wire for the extended date representation.
pub const DATE_KEY: &str = "$date";

/// A flat document: field name to value, keys unique.
pub type Fields = BTreeMap<String, EjsonValue>;

/// A dynamic EJSON value.
///
/// This is plain JSON extended with a typed date. Dates travel as
/// `{"$date": <milliseconds since the epoch>}` and are recognised before
/// any other object shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EjsonValue {
    /// Integral number.
    Int(i64),
    /// Non-integral number.
    Float(f64),
    /// Text string.
    String(String),
    /// Boolean value.
    Bool(bool),
    /// Point in time, millisecond precision on the wire.
    Date(DateTime<Utc>),
    /// Nested object.
    Object(Fields),
    /// Array of values.
    Array(Vec<EjsonValue>),
    /// JSON `null`.
    Null,
}

impl EjsonValue {
    /// Build a date value from milliseconds since the epoch.
    ///
    /// Returns `None` when the value is not finite or out of range.
    pub fn date_from_millis(millis: f64) -> Option<Self> {
        date_from_millis(millis).map(EjsonValue::Date)
    }

    /// Returns the shape name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            EjsonValue::Int(_) => "integer",
            EjsonValue::Float(_) => "float",
            EjsonValue::String(_) => "string",
            EjsonValue::Bool(_) => "bool",
            EjsonValue::Date(_) => "date",
            EjsonValue::Object(_) => "object",
            EjsonValue::Array(_) => "array",
            EjsonValue::Null => "null",
        }
    }

    /// Returns the string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EjsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EjsonValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the number as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EjsonValue::Int(n) => Some(*n as f64),
            EjsonValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EjsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the date if this is a date.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            EjsonValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the nested object if this is an object.
    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            EjsonValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Returns the elements if this is an array.
    pub fn as_array(&self) -> Option<&[EjsonValue]> {
        match self {
            EjsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true for `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, EjsonValue::Null)
    }
}

/// Convert milliseconds since the epoch into a UTC timestamp.
///
/// Fractional milliseconds are kept down to nanosecond resolution.
pub fn date_from_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    let mut secs = (millis / 1000.0).floor();
    let mut nanos = ((millis - secs * 1000.0) * 1_000_000.0).round();
    if nanos >= 1_000_000_000.0 {
        secs += 1.0;
        nanos -= 1_000_000_000.0;
    }
    if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    DateTime::from_timestamp(secs as i64, nanos as u32)
}

impl From<&str> for EjsonValue {
    fn from(value: &str) -> Self {
        EjsonValue::String(value.to_string())
    }
}

impl From<String> for EjsonValue {
    fn from(value: String) -> Self {
        EjsonValue::String(value)
    }
}

impl From<i64> for EjsonValue {
    fn from(value: i64) -> Self {
        EjsonValue::Int(value)
    }
}

impl From<i32> for EjsonValue {
    fn from(value: i32) -> Self {
        EjsonValue::Int(i64::from(value))
    }
}

impl From<f64> for EjsonValue {
    fn from(value: f64) -> Self {
        EjsonValue::Float(value)
    }
}

impl From<bool> for EjsonValue {
    fn from(value: bool) -> Self {
        EjsonValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for EjsonValue {
    fn from(value: DateTime<Utc>) -> Self {
        EjsonValue::Date(value)
    }
}

impl From<Fields> for EjsonValue {
    fn from(value: Fields) -> Self {
        EjsonValue::Object(value)
    }
}

impl From<Vec<EjsonValue>> for EjsonValue {
    fn from(value: Vec<EjsonValue>) -> Self {
        EjsonValue::Array(value)
    }
}

impl Serialize for EjsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EjsonValue::Int(n) => serializer.serialize_i64(*n),
            EjsonValue::Float(f) => serializer.serialize_f64(*f),
            EjsonValue::String(s) => serializer.serialize_str(s),
            EjsonValue::Bool(b) => serializer.serialize_bool(*b),
            EjsonValue::Date(d) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATE_KEY, &d.timestamp_millis())?;
                map.end()
            }
            EjsonValue::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            EjsonValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            EjsonValue::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for EjsonValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        crate::decoder::from_json_value(&json).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variants() {
        assert_eq!(EjsonValue::from("a").as_str(), Some("a"));
        assert_eq!(EjsonValue::from(3).as_i64(), Some(3));
        assert_eq!(EjsonValue::from(3).as_f64(), Some(3.0));
        assert_eq!(EjsonValue::from(true).as_bool(), Some(true));
        assert!(EjsonValue::Null.is_null());
        assert!(EjsonValue::from("a").as_i64().is_none());
    }

    #[test]
    fn date_from_millis_keeps_fraction() {
        let date = date_from_millis(1_500.5).unwrap();
        assert_eq!(date.timestamp(), 1);
        assert_eq!(date.timestamp_subsec_nanos(), 500_500_000);
    }

    #[test]
    fn date_from_millis_negative() {
        let date = date_from_millis(-1.0).unwrap();
        assert_eq!(date.timestamp_millis(), -1);
    }

    #[test]
    fn date_from_millis_rejects_non_finite() {
        assert!(date_from_millis(f64::NAN).is_none());
        assert!(date_from_millis(f64::INFINITY).is_none());
        assert!(date_from_millis(1e300).is_none());
    }

    #[test]
    fn date_serializes_to_date_shape() {
        let date = date_from_millis(1_700_000_000_123.0).unwrap();
        let text = serde_json::to_string(&EjsonValue::Date(date)).unwrap();
        assert_eq!(text, r#"{"$date":1700000000123}"#);
    }

    #[test]
    fn type_names() {
        assert_eq!(EjsonValue::Array(vec![]).type_name(), "array");
        assert_eq!(EjsonValue::Object(Fields::new()).type_name(), "object");
    }
}
