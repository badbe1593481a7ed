//! Error types for ledger operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task not found: execution={execution_id} task={task_id}")]
    NotFound {
        execution_id: String,
        task_id: String,
    },

    #[error("Task already exists: execution={execution_id} task={task_id}")]
    AlreadyExists {
        execution_id: String,
        task_id: String,
    },

    #[error("Task is terminal and cannot be modified: execution={execution_id} task={task_id}")]
    Terminal {
        execution_id: String,
        task_id: String,
    },

    #[error("Orchestrator callback failed: {0}")]
    Callback(String),
}

impl LedgerError {
    pub fn not_found(execution_id: &str, task_id: &str) -> Self {
        LedgerError::NotFound {
            execution_id: execution_id.to_string(),
            task_id: task_id.to_string(),
        }
    }

    pub fn already_exists(execution_id: &str, task_id: &str) -> Self {
        LedgerError::AlreadyExists {
            execution_id: execution_id.to_string(),
            task_id: task_id.to_string(),
        }
    }

    pub fn terminal(execution_id: &str, task_id: &str) -> Self {
        LedgerError::Terminal {
            execution_id: execution_id.to_string(),
            task_id: task_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}
