//! Conversions between flat documents and typed models.

use crate::decoder::{fields_from_json, json_type_name};
use crate::encoder::fields_to_json;
use crate::error::{EjsonError, EjsonResult};
use crate::value::Fields;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Decode a document into a typed model.
///
/// Date fields on the model should use [`crate::date`].
pub fn from_fields<T: DeserializeOwned>(fields: &Fields) -> EjsonResult<T> {
    let json = fields_to_json(fields)?;
    serde_json::from_value(json).map_err(|e| EjsonError::decode(e.to_string()))
}

/// Encode a typed model into a document. The model must serialize to an
/// object.
pub fn to_fields<T: Serialize>(value: &T) -> EjsonResult<Fields> {
    let json = serde_json::to_value(value).map_err(|e| EjsonError::encode(e.to_string()))?;
    if !json.is_object() {
        return Err(EjsonError::type_mismatch("object", json_type_name(&json)));
    }
    fields_from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EjsonValue;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Todo {
        #[serde(rename = "_id")]
        id: String,
        text: String,
        done: bool,
    }

    #[test]
    fn typed_roundtrip() {
        let todo = Todo {
            id: "42".into(),
            text: "buy milk".into(),
            done: false,
        };
        let fields = to_fields(&todo).unwrap();
        assert_eq!(fields.get("text"), Some(&EjsonValue::from("buy milk")));
        assert_eq!(from_fields::<Todo>(&fields).unwrap(), todo);
    }

    #[test]
    fn type_mismatch_is_decode_error() {
        let mut fields = Fields::new();
        fields.insert("_id".into(), "1".into());
        fields.insert("text".into(), 5.into());
        fields.insert("done".into(), false.into());
        let err = from_fields::<Todo>(&fields).unwrap_err();
        assert!(matches!(err, EjsonError::Decode { .. }));
    }

    #[test]
    fn non_object_model_is_rejected() {
        let err = to_fields(&vec![1, 2]).unwrap_err();
        assert_eq!(err, EjsonError::type_mismatch("object", "array"));
    }
}
