//! Byte sizes written as plain counts or with a unit suffix
//!
//! `1048576`, `"512KiB"`, `"1.5 GiB"`, `"10MB"`. Binary units (`KiB`, `MiB`,
//! `GiB`, `TiB`, and the bare `K`/`M`/`G`/`T`) are powers of 1024; `KB`/`MB`/
//! `GB`/`TB` are powers of 1000. A number with no unit is raw bytes.

use crate::error::ParameterError;
use serde_json::Value;

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("k", 1 << 10),
    ("kib", 1 << 10),
    ("kb", 1_000),
    ("m", 1 << 20),
    ("mib", 1 << 20),
    ("mb", 1_000_000),
    ("g", 1 << 30),
    ("gib", 1 << 30),
    ("gb", 1_000_000_000),
    ("t", 1 << 40),
    ("tib", 1 << 40),
    ("tb", 1_000_000_000_000),
];

pub fn parse_size(field: &'static str, text: &str) -> Result<u64, ParameterError> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    if number.is_empty() {
        return Err(ParameterError::invalid(
            field,
            format!("'{text}' does not start with a number"),
        ));
    }

    let unit = unit.trim().to_ascii_lowercase();
    let multiplier = if unit.is_empty() {
        1
    } else {
        UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| ParameterError::invalid(field, format!("unknown size unit '{unit}'")))?
    };

    if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| ParameterError::invalid(field, format!("'{number}' is not a number")))?;
        let bytes = (value * multiplier as f64).round();
        if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
            return Err(ParameterError::invalid(field, format!("'{text}' is out of range")));
        }
        Ok(bytes as u64)
    } else {
        let value: u64 = number
            .parse()
            .map_err(|_| ParameterError::invalid(field, format!("'{number}' is not a number")))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| ParameterError::invalid(field, format!("'{text}' is out of range")))
    }
}

/// Size from a JSON number or string; null means absent
pub fn size_from_value(field: &'static str, value: &Value) -> Result<Option<u64>, ParameterError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ParameterError::invalid(field, format!("{n} is not a byte count"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_size(field, s).map(Some),
        other => Err(ParameterError::invalid(
            field,
            format!("expected a size, got {other}"),
        )),
    }
}

/// Human-readable size for log lines
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const NAMES: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < NAMES.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", NAMES[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_and_suffixed_sizes() {
        assert_eq!(parse_size("size", "1024").unwrap(), 1024);
        assert_eq!(parse_size("size", "512KiB").unwrap(), 512 * 1024);
        assert_eq!(parse_size("size", "2 MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("size", "1GiB").unwrap(), 1 << 30);
        assert_eq!(parse_size("size", "1g").unwrap(), 1 << 30);
        assert_eq!(parse_size("size", "10MB").unwrap(), 10_000_000);
        assert_eq!(parse_size("size", "1.5KiB").unwrap(), 1536);
        assert_eq!(parse_size("size", "7b").unwrap(), 7);
    }

    #[test]
    fn test_bad_sizes_are_parameter_errors() {
        assert!(parse_size("size", "").is_err());
        assert!(parse_size("size", "MiB").is_err());
        assert!(parse_size("size", "12 parsecs").is_err());
        assert!(parse_size("size", "99999999999TiB").is_err());
    }

    #[test]
    fn test_size_from_json() {
        assert_eq!(size_from_value("s", &json!(100)).unwrap(), Some(100));
        assert_eq!(size_from_value("s", &json!("4KiB")).unwrap(), Some(4096));
        assert_eq!(size_from_value("s", &Value::Null).unwrap(), None);
        assert!(size_from_value("s", &json!(-1)).is_err());
        assert!(size_from_value("s", &json!(true)).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 << 30), "3.0 GiB");
    }
}
