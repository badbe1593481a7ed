use crate::entry::{TaskLogEntry, TaskStatus, Transition};
use crate::{LedgerError, Result, TaskLedger};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory ledger for tests and single-process runs
///
/// Every read-modify-write happens under one lock, so terminal transitions
/// are linearizable.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    // (execution_id, task_id) -> entry
    entries: Arc<Mutex<HashMap<(String, String), TaskLogEntry>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(execution_id: &str, task_id: &str) -> (String, String) {
    (execution_id.to_string(), task_id.to_string())
}

#[async_trait]
impl TaskLedger for MemoryLedger {
    async fn create(&self, entry: &TaskLogEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let k = key(&entry.execution_id, &entry.task_id);
        if entries.contains_key(&k) {
            return Err(LedgerError::already_exists(&entry.execution_id, &entry.task_id));
        }
        let _ = entries.insert(k, entry.clone());
        Ok(())
    }

    async fn get(&self, execution_id: &str, task_id: &str) -> Result<TaskLogEntry> {
        let entries = self.entries.lock().await;
        entries
            .get(&key(execution_id, task_id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found(execution_id, task_id))
    }

    async fn update_data(
        &self,
        execution_id: &str,
        task_id: &str,
        patch: Value,
    ) -> Result<TaskLogEntry> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&key(execution_id, task_id))
            .ok_or_else(|| LedgerError::not_found(execution_id, task_id))?;
        if entry.is_terminal() {
            return Err(LedgerError::terminal(execution_id, task_id));
        }
        entry.merge_data(patch);
        Ok(entry.clone())
    }

    async fn finish(
        &self,
        execution_id: &str,
        task_id: &str,
        status: TaskStatus,
        patch: Value,
    ) -> Result<Transition> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&key(execution_id, task_id))
            .ok_or_else(|| LedgerError::not_found(execution_id, task_id))?;
        if entry.is_terminal() {
            return Ok(Transition::AlreadyTerminal(entry.clone()));
        }
        entry.finish(status, patch);
        Ok(Transition::Applied(entry.clone()))
    }

    async fn list_execution(&self, execution_id: &str) -> Result<Vec<TaskLogEntry>> {
        let entries = self.entries.lock().await;
        let mut found: Vec<TaskLogEntry> = entries
            .values()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let ledger = MemoryLedger::new();
        let entry = TaskLogEntry::running("e", "root", None, "scanner", Value::Null);
        ledger.create(&entry).await.unwrap();

        let loaded = ledger.get("e", "root").await.unwrap();
        assert_eq!(loaded, entry);

        let err = ledger.create(&entry).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists { .. }));

        let err = ledger.get("e", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_finish_is_write_once() {
        let ledger = MemoryLedger::new();
        let entry = TaskLogEntry::running("e", "t", Some("root".into()), "worker", Value::Null);
        ledger.create(&entry).await.unwrap();

        let first = ledger
            .finish("e", "t", TaskStatus::Failed, json!({"error": "boom"}))
            .await
            .unwrap();
        assert!(first.was_applied());

        let second = ledger
            .finish("e", "t", TaskStatus::Succeeded, Value::Null)
            .await
            .unwrap();
        assert!(!second.was_applied());
        assert_eq!(second.entry().status, TaskStatus::Failed);
        assert_eq!(second.entry().end_time, first.entry().end_time);

        let err = ledger.update_data("e", "t", json!({"x": 1})).await.unwrap_err();
        assert!(matches!(err, LedgerError::Terminal { .. }));
    }

    #[tokio::test]
    async fn test_children_and_counts() {
        let ledger = MemoryLedger::new();
        ledger
            .create(&TaskLogEntry::running("e", "root", None, "scanner", Value::Null))
            .await
            .unwrap();
        for id in ["c1", "c2", "c3"] {
            ledger
                .create(&TaskLogEntry::running("e", id, Some("root".into()), "worker", Value::Null))
                .await
                .unwrap();
        }
        // Same ids in another execution must not leak in
        ledger
            .create(&TaskLogEntry::running(
                "other",
                "c4",
                Some("root".into()),
                "worker",
                Value::Null,
            ))
            .await
            .unwrap();

        let _ = ledger.finish("e", "c2", TaskStatus::Succeeded, Value::Null).await.unwrap();

        let children = ledger.list_children("e", "root").await.unwrap();
        let ids: Vec<_> = children.iter().map(|c| c.task_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);

        let counts = ledger.count_by_status("e", "root").await.unwrap();
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.running, 2);
    }
}
