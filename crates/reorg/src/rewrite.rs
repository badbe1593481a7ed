//! Destination key computation (`keepPrefix`)
//!
//! A rule maps the path of an object relative to the source prefix onto a
//! path relative to the destination prefix:
//!
//! - `true`: keep the whole relative path
//! - `false`: keep only the file name
//! - a map keyed by partition name: hive-style `name=value` directory
//!   segments are rewritten per entry, segments not named in the map are
//!   dropped, and the file name is always kept
//!
//! ```json
//! {"region": "retain", "dt": {"timeBucket": {"from": "%Y-%m-%d", "to": "%Y/%m"}}, "tier": {"default": "cold"}}
//! ```

use crate::error::{Error, ParameterError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentRule {
    /// Copy the segment unchanged
    Retain,
    /// Reparse the value with `from` and reformat it with `to`
    #[serde(alias = "time-bucket", alias = "time_bucket")]
    TimeBucket { from: String, to: String },
    /// Replace the value with a fixed literal
    Default(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathRewriteRule {
    #[default]
    Full,
    FileNameOnly,
    Segments(BTreeMap<String, SegmentRule>),
}

impl PathRewriteRule {
    /// Parse the loosely typed `keepPrefix` trigger field
    pub fn from_value(value: &Value) -> std::result::Result<Self, ParameterError> {
        match value {
            Value::Null => Ok(PathRewriteRule::Full),
            Value::Object(_) => {
                let segments: BTreeMap<String, SegmentRule> =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        ParameterError::invalid("keepPrefix", format!("bad segment rule: {e}"))
                    })?;
                Ok(PathRewriteRule::Segments(segments))
            }
            other => {
                if crate::params::loose_bool("keepPrefix", other)? {
                    Ok(PathRewriteRule::Full)
                } else {
                    Ok(PathRewriteRule::FileNameOnly)
                }
            }
        }
    }

    /// Rewrite the segments of a relative source path.
    ///
    /// `relative` is the key below the source prefix, split on `/`; the last
    /// element is the file name.
    pub fn apply(&self, relative: &[String]) -> Result<Vec<String>> {
        let Some((file_name, dirs)) = relative.split_last() else {
            return Err(Error::rewrite("", "empty object key"));
        };
        match self {
            PathRewriteRule::Full => Ok(relative.to_vec()),
            PathRewriteRule::FileNameOnly => Ok(vec![file_name.clone()]),
            PathRewriteRule::Segments(rules) => {
                let mut out = Vec::with_capacity(relative.len());
                let mut seen = Vec::new();
                for segment in dirs {
                    let Some((name, value)) = segment.split_once('=') else {
                        continue;
                    };
                    let Some(rule) = rules.get(name) else {
                        continue;
                    };
                    seen.push(name);
                    out.push(rewrite_segment(name, value, rule).map_err(|reason| {
                        Error::rewrite(relative.join("/"), reason)
                    })?);
                }
                // Defaults absent from the source are appended in name order
                for (name, rule) in rules {
                    if let SegmentRule::Default(value) = rule {
                        if !seen.contains(&name.as_str()) {
                            out.push(format!("{name}={value}"));
                        }
                    }
                }
                out.push(file_name.clone());
                Ok(out)
            }
        }
    }
}

fn rewrite_segment(
    name: &str,
    value: &str,
    rule: &SegmentRule,
) -> std::result::Result<String, String> {
    match rule {
        SegmentRule::Retain => Ok(format!("{name}={value}")),
        SegmentRule::Default(literal) => Ok(format!("{name}={literal}")),
        SegmentRule::TimeBucket { from, to } => {
            let when = parse_time(value, from)
                .ok_or_else(|| format!("'{value}' does not match time format '{from}'"))?;
            let mut formatted = String::new();
            write!(formatted, "{}", when.format(to))
                .map_err(|_| format!("invalid time format '{to}'"))?;
            Ok(format!("{name}={formatted}"))
        }
    }
}

/// Parse a date/time segment, accepting formats that stop at the hour or day
fn parse_time(value: &str, format: &str) -> Option<NaiveDateTime> {
    if let Ok(when) = NaiveDateTime::parse_from_str(value, format) {
        return Some(when);
    }
    if let Ok(when) =
        NaiveDateTime::parse_from_str(&format!("{value} 00"), &format!("{format} %M"))
    {
        return Some(when);
    }
    NaiveDate::parse_from_str(value, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parts(key: &str) -> Vec<String> {
        key.split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_keep_prefix_true_keeps_full_path() {
        let rule = PathRewriteRule::from_value(&json!(true)).unwrap();
        assert_eq!(rule.apply(&parts("a/b/c.csv")).unwrap(), parts("a/b/c.csv"));
    }

    #[test]
    fn test_keep_prefix_false_keeps_file_name_at_any_depth() {
        let rule = PathRewriteRule::from_value(&json!("false")).unwrap();
        assert_eq!(rule, PathRewriteRule::FileNameOnly);
        for key in ["c.csv", "a/c.csv", "a/b/c/d/e/c.csv"] {
            assert_eq!(rule.apply(&parts(key)).unwrap(), vec!["c.csv".to_string()]);
        }
    }

    #[test]
    fn test_segment_rules() {
        let rule = PathRewriteRule::from_value(&json!({
            "region": "retain",
            "dt": {"timeBucket": {"from": "%Y-%m-%d", "to": "%Y%m"}},
            "tier": {"default": "cold"},
        }))
        .unwrap();

        let out = rule
            .apply(&parts("region=eu/dt=2024-03-07/tier=hot/extra/f.parquet"))
            .unwrap();
        assert_eq!(out, parts("region=eu/dt=202403/tier=cold/f.parquet"));
    }

    #[test]
    fn test_unnamed_segments_dropped_and_missing_default_appended() {
        let rule = PathRewriteRule::from_value(&json!({
            "region": "retain",
            "tier": {"default": "cold"},
        }))
        .unwrap();
        let out = rule.apply(&parts("raw/region=us/host=a/f.log")).unwrap();
        assert_eq!(out, parts("region=us/tier=cold/f.log"));
    }

    #[test]
    fn test_time_bucket_with_hour_and_date_only_formats() {
        let rule = PathRewriteRule::from_value(&json!({
            "hour": {"time-bucket": {"from": "%Y-%m-%d-%H", "to": "%Y/%m/%d"}},
        }))
        .unwrap();
        let out = rule.apply(&parts("hour=2024-01-02-13/x.gz")).unwrap();
        assert_eq!(out.join("/"), "hour=2024/01/02/x.gz");
    }

    #[test]
    fn test_time_bucket_mismatch_is_rewrite_error() {
        let rule = PathRewriteRule::from_value(&json!({
            "dt": {"timeBucket": {"from": "%Y-%m-%d", "to": "%Y"}},
        }))
        .unwrap();
        let err = rule.apply(&parts("dt=yesterday/x.gz")).unwrap_err();
        assert!(matches!(err, Error::Rewrite { .. }));
    }

    #[test]
    fn test_bad_rule_is_parameter_error() {
        assert!(PathRewriteRule::from_value(&json!({"dt": "shuffle"})).is_err());
        assert!(PathRewriteRule::from_value(&json!([1, 2])).is_err());
    }
}
