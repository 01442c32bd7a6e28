//! Locale-aware number parsing (`1.234.567,89` style) and no-data sentinels.
use regex::Regex;
use serde_json::{Number, Value};
use std::sync::OnceLock;

/// Tokens the portal uses for "no data".
pub const NO_DATA_SENTINELS: [&str; 3] = ["nd", "*", "-"];

fn locale_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^-?(?:\d{1,3}(?:\.\d{3})*(?:,\d+)?|\d+,\d+)$").ok())
        .as_ref()
}

pub fn is_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    NO_DATA_SENTINELS
        .iter()
        .any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// Parses `text` as a number, preferring the `.` thousands / `,` decimal
/// convention and falling back to plain notation.
///
/// Values without a decimal part come back as integers.
pub fn parse_locale_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    if locale_pattern().is_some_and(|re| re.is_match(trimmed)) {
        let normalized = trimmed.replace('.', "");
        if normalized.contains(',') {
            let value: f64 = normalized.replace(',', ".").parse().ok()?;
            return Number::from_f64(value);
        }
        return normalized.parse::<i64>().ok().map(Number::from);
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(Number::from(value));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .and_then(Number::from_f64)
}

/// Converts a string value to a JSON number when it parses as one.
pub fn coerce_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => parse_locale_number(s).map(Value::Number),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_f64(text: &str) -> Option<f64> {
        parse_locale_number(text).and_then(|n| n.as_f64())
    }

    #[test]
    fn parses_thousands_and_decimal_separators() {
        assert_eq!(as_f64("1.234.567,89"), Some(1_234_567.89));
        assert_eq!(as_f64("123,45"), Some(123.45));
        assert_eq!(as_f64("-12,5"), Some(-12.5));
    }

    #[test]
    fn grouped_integers_stay_integers() {
        let n = parse_locale_number("4.548.313").unwrap();
        assert_eq!(n.as_i64(), Some(4_548_313));
    }

    #[test]
    fn falls_back_to_plain_notation() {
        assert_eq!(parse_locale_number("42").unwrap().as_i64(), Some(42));
        assert_eq!(as_f64("3.14159"), Some(3.14159));
    }

    #[test]
    fn rejects_text_and_non_finite_values() {
        assert!(parse_locale_number("Tintos").is_none());
        assert!(parse_locale_number("").is_none());
        assert!(parse_locale_number("inf").is_none());
        assert!(parse_locale_number("NaN").is_none());
        assert!(parse_locale_number("12 kg").is_none());
    }

    #[test]
    fn sentinels_are_recognized() {
        assert!(is_sentinel("-"));
        assert!(is_sentinel(" nd "));
        assert!(is_sentinel("ND"));
        assert!(is_sentinel("*"));
        assert!(!is_sentinel("0"));
        assert!(!is_sentinel("--"));
    }
}
