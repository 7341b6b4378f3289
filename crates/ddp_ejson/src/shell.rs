//! Normalizer for mongo-shell style fixture text.
//!
//! Fixtures copied out of a mongo shell contain wrappers that are not JSON:
//! `NumberLong(123)`, `NumberInt("5")`, `ISODate("2020-01-01T00:00:00.000Z")`.
//! [`normalize_shell_text`] rewrites them into plain numbers and EJSON dates
//! so the text can be fed to the decoder.

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static NUMBER_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Number\w+\(\s*"?(-?\d+(?:\.\d+)?)"?\s*\)"#).expect("valid number pattern")
});

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"ISODate\(\s*"([^"]+)"\s*\)"#).expect("valid date pattern"));

/// Rewrite mongo-shell number and date wrappers into EJSON text.
///
/// `ISODate` values that do not parse as RFC 3339 are left untouched.
pub fn normalize_shell_text(text: &str) -> String {
    let numbers = NUMBER_WRAPPER.replace_all(text, "$1");
    ISO_DATE
        .replace_all(&numbers, |caps: &Captures<'_>| {
            match DateTime::parse_from_rfc3339(&caps[1]) {
                Ok(date) => format!("{{ \"$date\": {} }}", date.timestamp_millis()),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::from_json_str;

    #[test]
    fn number_wrappers_become_digits() {
        assert_eq!(normalize_shell_text(r#"{"n": NumberLong(123)}"#), r#"{"n": 123}"#);
        assert_eq!(normalize_shell_text(r#"{"n": NumberInt("-5")}"#), r#"{"n": -5}"#);
        assert_eq!(
            normalize_shell_text(r#"{"n": NumberDecimal("1.25")}"#),
            r#"{"n": 1.25}"#
        );
    }

    #[test]
    fn iso_dates_become_ejson_dates() {
        let text = normalize_shell_text(r#"{"at": ISODate("1970-01-01T00:00:01.500Z")}"#);
        assert_eq!(text, r#"{"at": { "$date": 1500 }}"#);

        let value = from_json_str(&text).unwrap();
        let at = value.as_object().unwrap()["at"].as_date().unwrap();
        assert_eq!(at.timestamp_millis(), 1_500);
    }

    #[test]
    fn unparseable_dates_are_kept() {
        let text = r#"ISODate("yesterday")"#;
        assert_eq!(normalize_shell_text(text), text);
    }
}
