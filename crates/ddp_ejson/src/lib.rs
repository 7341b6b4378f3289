//! # DDP EJSON
//!
//! Extended JSON values and codecs for the DDP client.
//!
//! EJSON is plain JSON plus a typed date, written on the wire as
//! `{"$date": <milliseconds since the epoch>}`. This crate provides:
//! - [`EjsonValue`], the dynamic value type, and [`Fields`], a flat document
//! - Decoding with a fixed shape order (integer, float, string, bool, date,
//!   object, array)
//! - Encoding that always writes dates in the exact `$date` shape
//! - Typed model conversion and `#[serde(with = "ddp_ejson::date")]`
//! - Partial-update application ([`updated_instance`], [`apply_changes`])
//! - A normalizer for mongo-shell fixture text
//!
//! ## Usage
//!
//! ```
//! use ddp_ejson::{from_json_str, to_json_string, EjsonValue};
//!
//! let value = from_json_str(r#"{"at": {"$date": 1500}}"#).unwrap();
//! let at = value.as_object().unwrap()["at"].as_date().unwrap();
//! assert_eq!(at.timestamp_millis(), 1500);
//!
//! let text = to_json_string(&EjsonValue::Date(at)).unwrap();
//! assert_eq!(text, r#"{"$date":1500}"#);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod date;
mod decoder;
mod encoder;
mod error;
mod merge;
mod shell;
mod typed;
mod value;

pub use decoder::{fields_from_json, from_json_str, from_json_value, is_date_shape};
pub use encoder::{fields_to_json, to_json_string, to_json_value};
pub use error::{EjsonError, EjsonResult};
pub use merge::{apply_changes, merge_fields, merge_json, updated_instance, MergeMode};
pub use shell::normalize_shell_text;
pub use typed::{from_fields, to_fields};
pub use value::{date_from_millis, EjsonValue, Fields, DATE_KEY};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn date_roundtrip_within_millisecond(millis in -8_000_000_000_000_i64..8_000_000_000_000_i64, micros in 0u32..1000) {
            let original = date_from_millis(millis as f64 + f64::from(micros) / 1000.0).unwrap();
            let text = to_json_string(&EjsonValue::Date(original)).unwrap();
            let decoded = from_json_str(&text).unwrap().as_date().unwrap();
            let drift = (original - decoded).num_microseconds().unwrap().abs();
            prop_assert!(drift < 1000);
        }

        #[test]
        fn applying_same_change_twice_is_idempotent(
            base in proptest::collection::btree_map("[a-e]", any::<i64>(), 0..5),
            patch in proptest::collection::btree_map("[a-e]", any::<i64>(), 0..5),
        ) {
            let base: Fields = base.into_iter().map(|(k, v)| (k, EjsonValue::Int(v))).collect();
            let patch: Fields = patch.into_iter().map(|(k, v)| (k, EjsonValue::Int(v))).collect();

            let mut once = base.clone();
            apply_changes(&mut once, &patch, &[], MergeMode::Shallow);
            let mut twice = once.clone();
            apply_changes(&mut twice, &patch, &[], MergeMode::Shallow);
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn plain_scalars_roundtrip() {
        for text in ["1", "1.5", "\"s\"", "true", "null", "[1,2]", "{\"a\":1}"] {
            let value = from_json_str(text).unwrap();
            assert_eq!(to_json_string(&value).unwrap(), text);
        }
    }
}
