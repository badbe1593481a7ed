//! Coordinator-free completion detection
//!
//! Whoever finishes a task walks up the tree: when every child of the parent
//! is terminal, the parent is written terminal with the aggregate status and
//! the walk continues at the grandparent. Concurrent walkers are safe because
//! a terminal write on an already-terminal entry is a no-op, and only the
//! walker whose write was applied redeems the entry's task token.

use crate::entry::{ERROR, FAILED_TASK_IDS, StatusCounts, TaskLogEntry, TaskStatus, Transition};
use crate::orchestrator::{Orchestrator, redeem};
use crate::{Result, TaskLedger};
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Clone)]
pub struct CompletionTracker {
    ledger: Arc<dyn TaskLedger>,
    orchestrator: Arc<dyn Orchestrator>,
}

/// What one `complete` call did
#[derive(Debug, Clone)]
pub struct Completion {
    /// The caller's own terminal write
    pub transition: Transition,
    /// Ancestors finalized by this call, nearest first
    pub finalized: Vec<TaskLogEntry>,
}

impl CompletionTracker {
    pub fn new(ledger: Arc<dyn TaskLedger>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            ledger,
            orchestrator,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn TaskLedger> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    /// Write `task_id` terminal, redeem its own token if this call moved it,
    /// then propagate upward.
    pub async fn complete(
        &self,
        execution_id: &str,
        task_id: &str,
        status: TaskStatus,
        patch: Value,
    ) -> Result<Completion> {
        let transition = self
            .ledger
            .finish(execution_id, task_id, status, patch)
            .await?;
        match &transition {
            Transition::Applied(entry) => {
                debug!("Task {} finished {}", task_id, entry.status);
                self.redeem_token(entry).await?;
            }
            Transition::AlreadyTerminal(entry) => {
                debug!("Task {} was already {}", task_id, entry.status);
            }
        }
        let finalized = self.check_and_propagate(execution_id, task_id).await?;
        Ok(Completion {
            transition,
            finalized,
        })
    }

    /// Propagate terminal status upward from `task_id`, which must already be
    /// terminal. Re-entrant: callable any number of times by any worker.
    pub async fn check_and_propagate(
        &self,
        execution_id: &str,
        task_id: &str,
    ) -> Result<Vec<TaskLogEntry>> {
        let mut finalized = Vec::new();
        let mut current = self.ledger.get(execution_id, task_id).await?;
        if !current.is_terminal() {
            warn!(
                "Completion check for task {} skipped: still {}",
                task_id, current.status
            );
            return Ok(finalized);
        }

        while let Some(parent_id) = current.parent_task_id.clone() {
            let parent = self.ledger.get(execution_id, &parent_id).await?;
            if parent.is_terminal() {
                debug!("Parent {} already {}; stopping", parent_id, parent.status);
                break;
            }

            // Cheap count first; children are only read once it looks complete
            let hint = self.ledger.count_by_status(execution_id, &parent_id).await?;
            if !is_complete(&parent, hint) {
                debug!(
                    "Parent {}: {} of {} children terminal",
                    parent_id,
                    hint.terminal(),
                    parent.total_sub_task().unwrap_or(hint.total())
                );
                break;
            }

            let children = self.ledger.list_children(execution_id, &parent_id).await?;
            let counts = StatusCounts::from_entries(&children);
            if !is_complete(&parent, counts) {
                debug!("Parent {}: child entries still running", parent_id);
                break;
            }

            let (status, patch) = aggregate(&children, counts);
            match self
                .ledger
                .finish(execution_id, &parent_id, status, patch)
                .await?
            {
                Transition::Applied(entry) => {
                    info!(
                        "Task {} finished {} ({} succeeded, {} failed)",
                        parent_id, status, counts.succeeded, counts.failed
                    );
                    self.redeem_token(&entry).await?;
                    finalized.push(entry.clone());
                    current = entry;
                }
                Transition::AlreadyTerminal(_) => {
                    debug!("Parent {} finalized concurrently; stopping", parent_id);
                    break;
                }
            }
        }

        Ok(finalized)
    }

    async fn redeem_token(&self, entry: &TaskLogEntry) -> Result<()> {
        let payload = callback_payload(entry);
        match redeem(
            self.orchestrator.as_ref(),
            entry.task_token(),
            entry.status,
            payload,
        )
        .await
        {
            Ok(true) => {
                info!("Redeemed task token for task {}", entry.task_id);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                error!(
                    "Task {} is {} but its task token could not be redeemed: {}",
                    entry.task_id, entry.status, e
                );
                Err(e)
            }
        }
    }
}

fn is_complete(parent: &TaskLogEntry, counts: StatusCounts) -> bool {
    let expected = parent.total_sub_task().unwrap_or(counts.total());
    counts.running == 0 && counts.terminal() >= expected
}

fn aggregate(children: &[TaskLogEntry], counts: StatusCounts) -> (TaskStatus, Value) {
    if counts.failed == 0 {
        return (
            TaskStatus::Succeeded,
            json!({ "succeeded": counts.succeeded, "failed": 0 }),
        );
    }
    let failed: Vec<String> = children
        .iter()
        .flat_map(TaskLogEntry::failed_task_ids)
        .collect();
    (
        TaskStatus::Failed,
        json!({
            "succeeded": counts.succeeded,
            "failed": counts.failed,
            FAILED_TASK_IDS: failed,
        }),
    )
}

/// Payload handed to the orchestrator when `entry`'s token is redeemed
pub fn callback_payload(entry: &TaskLogEntry) -> Value {
    match entry.status {
        TaskStatus::Failed => {
            let failed = entry.failed_task_ids();
            let cause = match entry.data.get(ERROR).and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => format!("{} subtask(s) failed: {}", failed.len(), failed.join(", ")),
            };
            json!({
                "error": "TaskFailed",
                "cause": cause,
                "executionId": entry.execution_id,
                "taskId": entry.task_id,
                FAILED_TASK_IDS: failed,
            })
        }
        _ => json!({
            "executionId": entry.execution_id,
            "taskId": entry.task_id,
            "status": entry.status.to_string(),
            "totalSubTask": entry.total_sub_task(),
        }),
    }
}
