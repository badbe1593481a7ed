pub mod migrate;
pub mod scan;
pub mod status;

pub use migrate::migrate_command;
pub use scan::scan_command;
pub use status::status_command;

use ledger::{CallbackOutcome, MemoryOrchestrator};
use std::fmt::Write;

/// Append the callbacks the in-process orchestrator received
pub(crate) async fn write_callbacks(
    out: &mut String,
    orchestrator: &MemoryOrchestrator,
) -> anyhow::Result<()> {
    for callback in orchestrator.callbacks().await {
        let (kind, payload) = match &callback.outcome {
            CallbackOutcome::Success(payload) => ("success", payload),
            CallbackOutcome::Failure(payload) => ("failure", payload),
        };
        writeln!(out, "Callback {}: {} {}", callback.task_token, kind, payload)?;
    }
    Ok(())
}
