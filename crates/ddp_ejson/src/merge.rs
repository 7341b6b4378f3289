//! Partial-update application.
//!
//! A `changed` payload carries the keys that were set and, separately, the
//! keys that were cleared. Applying one to an existing value is:
//! merge updated keys, then delete cleared keys.

use crate::error::{EjsonError, EjsonResult};
use crate::value::{EjsonValue, Fields};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// How nested objects are combined during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Every updated key replaces the stored value wholesale.
    #[default]
    Shallow,
    /// When both sides hold an object under the same key, merge them
    /// recursively instead of replacing.
    Deep,
}

/// Merge `updated` into `original` and then remove every key in `cleared`.
pub fn apply_changes(original: &mut Fields, updated: &Fields, cleared: &[String], mode: MergeMode) {
    merge_fields(original, updated, mode);
    for key in cleared {
        original.remove(key);
    }
}

/// Merge `updated` into `original`.
pub fn merge_fields(original: &mut Fields, updated: &Fields, mode: MergeMode) {
    for (key, value) in updated {
        if mode == MergeMode::Deep {
            if let (Some(EjsonValue::Object(existing)), EjsonValue::Object(incoming)) =
                (original.get_mut(key), value)
            {
                merge_fields(existing, incoming, mode);
                continue;
            }
        }
        original.insert(key.clone(), value.clone());
    }
}

/// Merge a JSON object into another.
pub fn merge_json(original: &mut Map<String, Value>, updated: &Map<String, Value>, mode: MergeMode) {
    for (key, value) in updated {
        if mode == MergeMode::Deep {
            if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                (original.get_mut(key), value)
            {
                merge_json(existing, incoming, mode);
                continue;
            }
        }
        original.insert(key.clone(), value.clone());
    }
}

/// Apply a partial update to a typed value.
///
/// The value is encoded to a JSON object, `updated` is merged onto it,
/// the `cleared` keys are removed and the result is decoded back into
/// `T`. Keys that only exist in `updated` are added; untouched keys keep
/// their original values.
///
/// # Errors
///
/// Fails if `T` does not encode to an object or the merged object no
/// longer decodes into `T`.
pub fn updated_instance<T>(
    value: &T,
    updated: &Map<String, Value>,
    cleared: &[String],
    mode: MergeMode,
) -> EjsonResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let encoded = serde_json::to_value(value).map_err(|e| EjsonError::encode(e.to_string()))?;
    let Value::Object(mut object) = encoded else {
        return Err(EjsonError::type_mismatch(
            "object",
            crate::decoder::json_type_name(&encoded),
        ));
    };

    merge_json(&mut object, updated, mode);
    for key in cleared {
        object.remove(key);
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| EjsonError::decode(e.to_string()))
}
