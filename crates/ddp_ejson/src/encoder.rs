//! EJSON encoder.

use crate::error::{EjsonError, EjsonResult};
use crate::value::{EjsonValue, Fields, DATE_KEY};
use serde_json::{Map, Number, Value};

/// Encode an EJSON value into a JSON value.
///
/// Dates always become `{"$date": <integer milliseconds>}`.
///
/// # Errors
///
/// Returns [`EjsonError::NonFiniteNumber`] for NaN or infinite floats.
pub fn to_json_value(value: &EjsonValue) -> EjsonResult<Value> {
    Ok(match value {
        EjsonValue::Int(n) => Value::Number(Number::from(*n)),
        EjsonValue::Float(f) => {
            Value::Number(Number::from_f64(*f).ok_or(EjsonError::NonFiniteNumber)?)
        }
        EjsonValue::String(s) => Value::String(s.clone()),
        EjsonValue::Bool(b) => Value::Bool(*b),
        EjsonValue::Date(d) => {
            let mut map = Map::with_capacity(1);
            map.insert(
                DATE_KEY.to_string(),
                Value::Number(Number::from(d.timestamp_millis())),
            );
            Value::Object(map)
        }
        EjsonValue::Object(fields) => Value::Object(fields_to_map(fields)?),
        EjsonValue::Array(items) => Value::Array(
            items
                .iter()
                .map(to_json_value)
                .collect::<EjsonResult<Vec<_>>>()?,
        ),
        EjsonValue::Null => Value::Null,
    })
}

/// Encode a flat document into a JSON object.
pub fn fields_to_json(fields: &Fields) -> EjsonResult<Value> {
    fields_to_map(fields).map(Value::Object)
}

/// Encode an EJSON value into JSON text.
pub fn to_json_string(value: &EjsonValue) -> EjsonResult<String> {
    let json = to_json_value(value)?;
    serde_json::to_string(&json).map_err(|e| EjsonError::encode(e.to_string()))
}

fn fields_to_map(fields: &Fields) -> EjsonResult<Map<String, Value>> {
    fields
        .iter()
        .map(|(k, v)| to_json_value(v).map(|v| (k.clone(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::from_json_value;
    use crate::value::date_from_millis;
    use serde_json::json;

    #[test]
    fn date_encodes_to_exact_shape() {
        let date = date_from_millis(1_234.0).unwrap();
        let json = to_json_value(&EjsonValue::Date(date)).unwrap();
        assert_eq!(json, json!({"$date": 1234}));
    }

    #[test]
    fn nan_is_rejected() {
        assert_eq!(
            to_json_value(&EjsonValue::Float(f64::NAN)),
            Err(EjsonError::NonFiniteNumber)
        );
    }

    #[test]
    fn document_with_date_survives_decode() {
        let mut fields = Fields::new();
        fields.insert("text".into(), "buy milk".into());
        fields.insert("at".into(), EjsonValue::Date(date_from_millis(99.0).unwrap()));

        let json = fields_to_json(&fields).unwrap();
        let decoded = from_json_value(&json).unwrap();
        assert_eq!(decoded, EjsonValue::Object(fields));
    }

    #[test]
    fn string_output() {
        let value = EjsonValue::Array(vec![1.into(), "x".into(), EjsonValue::Null]);
        assert_eq!(to_json_string(&value).unwrap(), r#"[1,"x",null]"#);
    }
}
