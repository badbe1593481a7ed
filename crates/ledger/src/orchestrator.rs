//! Workflow orchestrator callback surface
//!
//! A paused workflow step hands out an opaque task token and waits for one
//! success or failure callback carrying it.

use crate::entry::TaskStatus;
use crate::{LedgerError, Result};
use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn signal_success(&self, task_token: &str, result: Value) -> Result<()>;

    async fn signal_failure(&self, task_token: &str, error: Value) -> Result<()>;
}

/// Redeem `task_token` according to `status`; absent tokens are a no-op.
///
/// Returns whether a callback was sent.
pub async fn redeem(
    orchestrator: &dyn Orchestrator,
    task_token: Option<&str>,
    status: TaskStatus,
    payload: Value,
) -> Result<bool> {
    let Some(token) = task_token.filter(|t| !t.is_empty()) else {
        return Ok(false);
    };
    match status {
        TaskStatus::Succeeded => orchestrator.signal_success(token, payload).await?,
        TaskStatus::Failed => orchestrator.signal_failure(token, payload).await?,
        TaskStatus::Running => {
            return Err(LedgerError::Callback(
                "cannot redeem a task token for a running task".to_string(),
            ));
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Success(Value),
    Failure(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Callback {
    pub task_token: String,
    pub outcome: CallbackOutcome,
}

/// Orchestrator that records callbacks in memory and logs them
#[derive(Clone, Default)]
pub struct MemoryOrchestrator {
    callbacks: Arc<Mutex<Vec<Callback>>>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn callbacks(&self) -> Vec<Callback> {
        self.callbacks.lock().await.clone()
    }
}

#[async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn signal_success(&self, task_token: &str, result: Value) -> Result<()> {
        info!("Task token {} redeemed: success", task_token);
        self.callbacks.lock().await.push(Callback {
            task_token: task_token.to_string(),
            outcome: CallbackOutcome::Success(result),
        });
        Ok(())
    }

    async fn signal_failure(&self, task_token: &str, error: Value) -> Result<()> {
        info!("Task token {} redeemed: failure", task_token);
        self.callbacks.lock().await.push(Callback {
            task_token: task_token.to_string(),
            outcome: CallbackOutcome::Failure(error),
        });
        Ok(())
    }
}
