//! Serde helpers for `DateTime<Utc>` fields in typed models.
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Todo {
//!     text: String,
//!     #[serde(with = "ddp_ejson::date")]
//!     created_at: DateTime<Utc>,
//! }
//! ```

use crate::value::{date_from_millis, DATE_KEY};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
struct WireDate {
    #[serde(rename = "$date")]
    millis: f64,
}

/// Serialize a timestamp as `{"$date": <ms>}`.
pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(DATE_KEY, &date.timestamp_millis())?;
    map.end()
}

/// Deserialize a timestamp from `{"$date": <ms>}`.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let wire = WireDate::deserialize(deserializer)?;
    date_from_millis(wire.millis)
        .ok_or_else(|| D::Error::custom(format!("invalid $date value: {}", wire.millis)))
}

/// The same helpers for `Option<DateTime<Utc>>` fields.
pub mod option {
    use super::*;

    /// Serialize an optional timestamp; `None` becomes `null`.
    pub fn serialize<S: Serializer>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => super::serialize(date, serializer),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let wire = Option::<WireDate>::deserialize(deserializer)?;
        wire.map(|w| {
            date_from_millis(w.millis)
                .ok_or_else(|| D::Error::custom(format!("invalid $date value: {}", w.millis)))
        })
        .transpose()
    }
}
