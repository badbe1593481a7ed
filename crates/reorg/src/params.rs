//! Trigger and queue message parameters
//!
//! This is the one place loosely typed input is accepted. Booleans arrive as
//! `true`, `"true"`, `1` or `"0"`; sizes as byte counts or `"<N><unit>"`.
//! Everything past this module sees typed values only.

use crate::error::ParameterError;
use crate::location::ObjectUri;
use crate::rewrite::PathRewriteRule;
use crate::size::size_from_value;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Objects per migration request when the trigger does not say
pub const DEFAULT_MAX_OBJECTS_PER_TASK: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub location: String,
    pub key: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.location, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPair {
    pub source: ObjectRef,
    pub destination: ObjectRef,
}

/// One unit of dispatched work
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    pub execution_id: String,
    pub task_id: String,
    pub parent_task_id: String,
    pub source_type: String,
    pub data: Vec<ObjectPair>,
    pub delete_on_success: bool,
    pub merge: bool,
    pub enrichment_plugins: Vec<String>,
    pub task_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMigrationRequest {
    execution_id: Option<String>,
    task_id: Option<String>,
    parent_task_id: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    data: Option<Vec<ObjectPair>>,
    #[serde(default)]
    delete_on_success: Value,
    #[serde(default)]
    merge: Value,
    #[serde(default)]
    enrichment_plugins: Option<Vec<String>>,
    #[serde(default)]
    task_token: Option<String>,
}

impl MigrationRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ParameterError> {
        let raw: RawMigrationRequest = serde_json::from_slice(body)?;
        Self::try_from(raw)
    }

    pub fn from_value(value: Value) -> Result<Self, ParameterError> {
        let raw: RawMigrationRequest = serde_json::from_value(value)?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl TryFrom<RawMigrationRequest> for MigrationRequest {
    type Error = ParameterError;

    fn try_from(raw: RawMigrationRequest) -> Result<Self, Self::Error> {
        Ok(MigrationRequest {
            execution_id: required("executionId", raw.execution_id)?,
            task_id: required("taskId", raw.task_id)?,
            parent_task_id: required("parentTaskId", raw.parent_task_id)?,
            source_type: raw.source_type.unwrap_or_else(|| "object".to_string()),
            data: raw.data.unwrap_or_default(),
            delete_on_success: loose_bool("deleteOnSuccess", &raw.delete_on_success)?,
            merge: loose_bool("merge", &raw.merge)?,
            enrichment_plugins: raw.enrichment_plugins.unwrap_or_default(),
            task_token: raw.task_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Scanner trigger
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub execution_id: String,
    pub src_path: ObjectUri,
    /// Destination root; the source root when absent
    pub dst_path: ObjectUri,
    pub keep_prefix: PathRewriteRule,
    /// Target size of one merged object
    pub size: Option<u64>,
    pub max_objects_per_task: usize,
    pub max_bytes_per_task: Option<u64>,
    pub merge: bool,
    pub delete_on_success: bool,
    pub enrichment_plugins: Vec<String>,
    pub task_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScanRequest {
    execution_id: Option<String>,
    src_path: Option<String>,
    #[serde(default)]
    dst_path: Option<String>,
    #[serde(default)]
    keep_prefix: Value,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    max_object_files_num_per_copy_task: Value,
    #[serde(default)]
    max_object_files_size_per_copy_task: Value,
    #[serde(default)]
    merge: Value,
    #[serde(default)]
    delete_on_success: Value,
    #[serde(default)]
    enrichment_plugins: Option<Vec<String>>,
    #[serde(default)]
    task_token: Option<String>,
}

impl ScanRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, ParameterError> {
        let raw: RawScanRequest = serde_json::from_slice(body)?;
        Self::try_from(raw)
    }

    pub fn from_value(value: Value) -> Result<Self, ParameterError> {
        let raw: RawScanRequest = serde_json::from_value(value)?;
        Self::try_from(raw)
    }

    /// Byte bound on one group: merged output is also held to `size`
    #[must_use]
    pub fn group_byte_limit(&self) -> Option<u64> {
        match (self.merge, self.size, self.max_bytes_per_task) {
            (true, Some(size), Some(max)) => Some(size.min(max)),
            (true, Some(size), None) => Some(size),
            (_, _, max) => max,
        }
    }
}

impl TryFrom<RawScanRequest> for ScanRequest {
    type Error = ParameterError;

    fn try_from(raw: RawScanRequest) -> Result<Self, Self::Error> {
        let src_path: ObjectUri = required("srcPath", raw.src_path)?.parse()?;
        let dst_path = match raw.dst_path.filter(|p| !p.is_empty()) {
            Some(path) => path.parse()?,
            None => src_path.clone(),
        };
        let max_objects_per_task = loose_count(
            "maxObjectFilesNumPerCopyTask",
            &raw.max_object_files_num_per_copy_task,
        )?
        .unwrap_or(DEFAULT_MAX_OBJECTS_PER_TASK);
        if max_objects_per_task == 0 {
            return Err(ParameterError::invalid(
                "maxObjectFilesNumPerCopyTask",
                "must be at least 1",
            ));
        }
        let size = size_from_value("size", &raw.size)?.filter(|s| *s > 0);
        let max_bytes_per_task = size_from_value(
            "maxObjectFilesSizePerCopyTask",
            &raw.max_object_files_size_per_copy_task,
        )?
        .filter(|s| *s > 0);

        Ok(ScanRequest {
            execution_id: required("executionId", raw.execution_id)?,
            src_path,
            dst_path,
            keep_prefix: PathRewriteRule::from_value(&raw.keep_prefix)?,
            size,
            max_objects_per_task,
            max_bytes_per_task,
            merge: loose_bool("merge", &raw.merge)?,
            delete_on_success: loose_bool("deleteOnSuccess", &raw.delete_on_success)?,
            enrichment_plugins: raw.enrichment_plugins.unwrap_or_default(),
            task_token: raw.task_token.filter(|t| !t.is_empty()),
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ParameterError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ParameterError::Missing(field))
}

/// Boolean from `true`/`false`, `1`/`0`, or their string forms; null is false
pub(crate) fn loose_bool(field: &'static str, value: &Value) -> Result<bool, ParameterError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(ParameterError::invalid(field, format!("{n} is not a boolean"))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(ParameterError::invalid(
                field,
                format!("'{other}' is not a boolean"),
            )),
        },
        other => Err(ParameterError::invalid(
            field,
            format!("{other} is not a boolean"),
        )),
    }
}

fn loose_count(field: &'static str, value: &Value) -> Result<Option<usize>, ParameterError> {
    let n = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    n.and_then(|n| usize::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| ParameterError::invalid(field, format!("{value} is not a count")))
}
