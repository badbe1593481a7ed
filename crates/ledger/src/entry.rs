//! Task records persisted in the ledger
//!
//! One `TaskLogEntry` is one node of a task tree: the batch root, an
//! intermediate group, or a leaf that a migration worker owns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key under `data` holding the declared number of children
pub const TOTAL_SUB_TASK: &str = "totalSubTask";

/// Key under `data` holding an orchestrator task token
pub const TASK_TOKEN: &str = "taskToken";

/// Key under `data` listing the leaf tasks responsible for a failure
pub const FAILED_TASK_IDS: &str = "failedTaskIds";

/// Key under `data` holding the error text of a failed leaf
pub const ERROR: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Running => "Running",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Ledger record: `{executionId, taskId, parentTaskId, status, startTime, endTime, functionName, data}`
///
/// Timestamps are microseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogEntry {
    pub execution_id: String,
    pub task_id: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub status: TaskStatus,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    pub function_name: String,
    #[serde(default)]
    pub data: Value,
}

impl TaskLogEntry {
    /// A fresh Running entry stamped with the current time
    #[must_use]
    pub fn running(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        parent_task_id: Option<String>,
        function_name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            parent_task_id,
            status: TaskStatus::Running,
            start_time: now_micros(),
            end_time: None,
            function_name: function_name.into(),
            data,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }

    /// Declared child count, if the creator pre-declared one
    #[must_use]
    pub fn total_sub_task(&self) -> Option<usize> {
        self.data
            .get(TOTAL_SUB_TASK)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    }

    #[must_use]
    pub fn task_token(&self) -> Option<&str> {
        self.data
            .get(TASK_TOKEN)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Leaf task ids blamed for this entry's failure.
    ///
    /// A failed leaf blames itself; a failed parent carries the ids it
    /// collected from its children.
    #[must_use]
    pub fn failed_task_ids(&self) -> Vec<String> {
        if self.status != TaskStatus::Failed {
            return Vec::new();
        }
        match self.data.get(FAILED_TASK_IDS).and_then(Value::as_array) {
            Some(ids) => ids
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => vec![self.task_id.clone()],
        }
    }

    /// Merge `patch` keys into `data`
    pub fn merge_data(&mut self, patch: Value) {
        merge_json(&mut self.data, patch);
    }

    /// Move into a terminal status. Callers check `is_terminal` first.
    pub fn finish(&mut self, status: TaskStatus, patch: Value) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(now_micros());
        self.merge_data(patch);
    }
}

/// Result of a terminal write
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// This call moved the entry from Running to terminal
    Applied(TaskLogEntry),
    /// The entry was already terminal; nothing was written
    AlreadyTerminal(TaskLogEntry),
}

impl Transition {
    #[must_use]
    pub fn entry(&self) -> &TaskLogEntry {
        match self {
            Transition::Applied(entry) | Transition::AlreadyTerminal(entry) => entry,
        }
    }

    #[must_use]
    pub fn into_entry(self) -> TaskLogEntry {
        match self {
            Transition::Applied(entry) | Transition::AlreadyTerminal(entry) => entry,
        }
    }

    #[must_use]
    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Children of one parent, counted by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a TaskLogEntry>) -> Self {
        let mut counts = Self::default();
        for entry in entries {
            match entry.status {
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.running + self.succeeded + self.failed
    }

    #[must_use]
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (_, Value::Null) => {}
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let _ = existing.insert(key, value);
            }
        }
        (target @ Value::Null, Value::Object(incoming)) => {
            *target = Value::Object(incoming);
        }
        (target, other) => {
            // Non-object data is kept under "value" so nothing is lost.
            let mut map = Map::new();
            if !target.is_null() {
                let _ = map.insert("value".to_string(), target.take());
            }
            let _ = map.insert("patch".to_string(), other);
            *target = Value::Object(map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_shape_is_camel_case() {
        let entry = TaskLogEntry::running(
            "exec-1",
            "task-1",
            Some("root".to_string()),
            "reorg-worker",
            json!({"objects": 3}),
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["executionId"], "exec-1");
        assert_eq!(value["taskId"], "task-1");
        assert_eq!(value["parentTaskId"], "root");
        assert_eq!(value["status"], "Running");
        assert_eq!(value["functionName"], "reorg-worker");
        assert!(value["endTime"].is_null());
        assert_eq!(value["data"]["objects"], 3);
    }

    #[test]
    fn test_finish_sets_end_time_and_merges_data() {
        let mut entry = TaskLogEntry::running("e", "t", None, "f", json!({"totalSubTask": 2}));
        assert_eq!(entry.total_sub_task(), Some(2));
        assert!(entry.end_time.is_none());

        entry.finish(TaskStatus::Failed, json!({"failedTaskIds": ["a", "b"]}));
        assert!(entry.is_terminal());
        assert!(entry.end_time.is_some());
        assert_eq!(entry.total_sub_task(), Some(2));
        assert_eq!(entry.failed_task_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_failed_leaf_blames_itself() {
        let mut entry = TaskLogEntry::running("e", "leaf", Some("p".into()), "f", Value::Null);
        assert!(entry.failed_task_ids().is_empty());
        entry.finish(TaskStatus::Failed, json!({"error": "boom"}));
        assert_eq!(entry.failed_task_ids(), vec!["leaf".to_string()]);
    }

    #[test]
    fn test_empty_token_is_absent() {
        let entry = TaskLogEntry::running("e", "t", None, "f", json!({"taskToken": ""}));
        assert_eq!(entry.task_token(), None);
        let entry = TaskLogEntry::running("e", "t", None, "f", json!({"taskToken": "tok"}));
        assert_eq!(entry.task_token(), Some("tok"));
    }

    #[test]
    fn test_status_counts() {
        let mut a = TaskLogEntry::running("e", "a", Some("p".into()), "f", Value::Null);
        let b = TaskLogEntry::running("e", "b", Some("p".into()), "f", Value::Null);
        a.finish(TaskStatus::Succeeded, Value::Null);
        let counts = StatusCounts::from_entries([&a, &b]);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.terminal(), 1);
        assert_eq!(counts.running, 1);
    }
}
