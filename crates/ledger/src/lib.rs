//! Task ledger - durable task-tree state for the object reorganizer
//!
//! Every unit of work is a `TaskLogEntry` keyed by (executionId, taskId).
//! Nothing here keeps ledger state in process memory between calls except
//! the `MemoryLedger` backend used by tests and single-process runs.
//!
//! # Architecture
//!
//! - **TaskLedger**: keyed store with create / get / update / count-by-status / list-children
//! - **ObjectStoreLedger**: one JSON object per task, conditional writes
//! - **MemoryLedger**: same contract behind a mutex
//! - **CompletionTracker**: walks up the tree finalizing parents once all children are terminal
//! - **Orchestrator**: the task-token callback surface redeemed at the root

mod entry;
mod error;
mod memory;
mod orchestrator;
mod store;
mod tracker;

pub use entry::{
    ERROR, FAILED_TASK_IDS, StatusCounts, TASK_TOKEN, TOTAL_SUB_TASK, TaskLogEntry, TaskStatus,
    Transition,
};
pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use orchestrator::{Callback, CallbackOutcome, MemoryOrchestrator, Orchestrator, redeem};
pub use store::ObjectStoreLedger;
pub use tracker::{Completion, CompletionTracker, callback_payload};

use async_trait::async_trait;
use serde_json::Value;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Keyed store of task records
///
/// Implementations give concurrency-safe read-modify-write on a single entry;
/// nothing spans more than one entry.
#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Insert a new entry; fails with `AlreadyExists` if the key is taken
    async fn create(&self, entry: &TaskLogEntry) -> Result<()>;

    async fn get(&self, execution_id: &str, task_id: &str) -> Result<TaskLogEntry>;

    /// Merge `patch` into a Running entry's data
    async fn update_data(
        &self,
        execution_id: &str,
        task_id: &str,
        patch: Value,
    ) -> Result<TaskLogEntry>;

    /// Move a Running entry to a terminal status.
    ///
    /// Terminal entries are immutable: the call then returns
    /// `Transition::AlreadyTerminal` with the stored entry and writes nothing.
    async fn finish(
        &self,
        execution_id: &str,
        task_id: &str,
        status: TaskStatus,
        patch: Value,
    ) -> Result<Transition>;

    /// Every entry of an execution, ordered by task id
    async fn list_execution(&self, execution_id: &str) -> Result<Vec<TaskLogEntry>>;

    /// Entries whose parent is `parent_task_id`, ordered by task id
    async fn list_children(
        &self,
        execution_id: &str,
        parent_task_id: &str,
    ) -> Result<Vec<TaskLogEntry>> {
        let mut entries = self.list_execution(execution_id).await?;
        entries.retain(|e| e.parent_task_id.as_deref() == Some(parent_task_id));
        Ok(entries)
    }

    async fn count_by_status(
        &self,
        execution_id: &str,
        parent_task_id: &str,
    ) -> Result<StatusCounts> {
        let children = self.list_children(execution_id, parent_task_id).await?;
        Ok(StatusCounts::from_entries(&children))
    }
}
