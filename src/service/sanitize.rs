//! Data hygiene applied before serialization.

use serde_json::{Number, Value};
use std::collections::HashSet;

use crate::domain::{Record, YEAR_KEY};
use crate::parser::is_sentinel;
use crate::reliability::convert_numeric_columns;

/// Key fragments that mark page chrome captured as columns.
const JUNK_KEY_MARKERS: [&str; 3] = ["copyright", "embrapa", "dados da vitivinicultura"];

/// Cell text that only appears in navigation rows.
const NAVIGATION_TOKENS: [&str; 2] = ["DOWNLOAD", "TOPO"];
const NAVIGATION_GLYPHS: [char; 4] = ['«', '‹', '›', '»'];

/// Cell text prefixes of banner rows.
const CHROME_PREFIXES: [&str; 2] = ["banco de dados de uva", "copyright"];

/// Maps a float onto a JSON-representable value: NaN becomes null and the
/// infinities clamp to the largest finite magnitude.
pub fn finite_number(value: f64) -> Value {
    if value.is_nan() {
        return Value::Null;
    }
    let clamped = if value.is_infinite() {
        value.signum() * f64::MAX
    } else {
        value
    };
    Number::from_f64(clamped).map_or(Value::Null, Value::Number)
}

fn clean_value(value: Value) -> Value {
    match value {
        Value::String(s) if is_sentinel(&s) => Value::Null,
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            match lowered.as_str() {
                "nan" => Value::Null,
                "inf" | "+inf" | "infinity" => finite_number(f64::INFINITY),
                "-inf" | "-infinity" => finite_number(f64::NEG_INFINITY),
                _ => Value::String(s),
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(clean_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, clean_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Makes records safe and useful as JSON.
///
/// Sentinels become null, textual NaN/infinity are normalized, nested values
/// are cleaned recursively, and columns whose values are mostly locale
/// numbers are converted to numbers.
pub fn sanitize_for_json(data: Vec<Record>) -> Vec<Record> {
    let mut cleaned: Vec<Record> = data
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .map(|(k, v)| (k, clean_value(v)))
                .collect()
        })
        .collect();
    convert_numeric_columns(&mut cleaned);
    cleaned
}

fn is_junk_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    JUNK_KEY_MARKERS.iter().any(|m| lowered.contains(m))
}

fn is_generic_key(key: &str) -> bool {
    key.strip_prefix("column_")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim()),
        _ => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_noise_row(record: &Record) -> bool {
    let data: Vec<(&String, &Value)> = record
        .iter()
        .filter(|(key, _)| key.as_str() != YEAR_KEY)
        .collect();

    if data.iter().all(|(_, value)| is_empty_value(value)) {
        return true;
    }

    let texts: Vec<&str> = data.iter().filter_map(|(_, value)| text_of(value)).collect();

    let navigation = texts.iter().any(|text| {
        NAVIGATION_TOKENS.contains(&text.to_uppercase().as_str())
            || text.chars().any(|c| NAVIGATION_GLYPHS.contains(&c))
    });
    let chrome = texts.iter().any(|text| {
        let lowered = text.to_lowercase();
        CHROME_PREFIXES.iter().any(|p| lowered.starts_with(p))
    });
    let header_repeat = data
        .iter()
        .filter(|(_, value)| !is_empty_value(value))
        .all(|(key, value)| text_of(value).is_some_and(|text| text == key.trim()));

    navigation || chrome || header_repeat
}

/// Strips portal chrome that table extraction picks up along with the data.
///
/// Drops junk keys (copyright and banner columns, and `column_N` keys when
/// real headers exist), then navigation, banner, header-repeat and empty
/// rows, then exact duplicates.
pub fn clean_unnecessary_headers(data: Vec<Record>) -> Vec<Record> {
    let has_real_headers = data.iter().any(|record| {
        record
            .keys()
            .any(|k| k != YEAR_KEY && !is_generic_key(k) && !is_junk_key(k))
    });

    let mut seen = HashSet::new();
    data.into_iter()
        .map(|record| {
            record
                .into_iter()
                .filter(|(key, _)| !is_junk_key(key) && !(has_real_headers && is_generic_key(key)))
                .collect::<Record>()
        })
        .filter(|record| !record.is_empty() && !is_noise_row(record))
        .filter(|record| seen.insert(Value::Object(record.clone()).to_string()))
        .collect()
}
