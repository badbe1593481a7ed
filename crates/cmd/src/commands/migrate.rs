use crate::commands::write_callbacks;
use crate::config::ReorgConfig;
use anyhow::{Context, Result};
use reorg::scanner::WORKER_FUNCTION;
use reorg::{MigrationWorker, format_size};
use std::fmt::Write;
use std::path::Path;

/// Process one migration message, as a queue consumer would
#[allow(clippy::print_stdout)]
pub async fn migrate_command(config: &ReorgConfig, message: &Path) -> Result<()> {
    let body = std::fs::read(message)
        .with_context(|| format!("Failed to read message: {}", message.display()))?;
    let output = migrate_command_as_string(config, &body).await?;
    print!("{}", output);
    Ok(())
}

pub async fn migrate_command_as_string(config: &ReorgConfig, body: &[u8]) -> Result<String> {
    let runtime = config.open()?;
    let worker = MigrationWorker::new(runtime.stores.clone(), runtime.tracker()).with_function_name(
        config
            .worker_function
            .as_deref()
            .unwrap_or(WORKER_FUNCTION),
    );

    let mut output = String::new();
    let outcome = worker.handle_message(body).await;
    // Failure callbacks are sent before the error comes back
    write_callbacks(&mut output, &runtime.orchestrator).await?;
    let outcome = outcome?;

    let mut summary = format!(
        "Task {}: {}, {} objects, {} written",
        outcome.task_id,
        outcome.status,
        outcome.objects,
        format_size(outcome.bytes_written)
    );
    if outcome.redelivered {
        summary.push_str(" (redelivered)");
    }
    output.insert_str(0, &format!("{summary}\n"));
    for finalized in &outcome.finalized {
        writeln!(
            output,
            "Finalized {} of batch {}: {}",
            finalized.task_id, finalized.execution_id, finalized.status
        )?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::scan::run_scan;
    use crate::config::parse_config;
    use ledger::TaskStatus;
    use reorg::ROOT_TASK_ID;
    use std::fs;

    #[tokio::test]
    async fn test_redelivered_message_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("data/in"))?;
        fs::write(dir.path().join("data/in/x.log"), "x\n")?;
        let config = parse_config(&format!(
            "ledger:\n  url: {}\nstores:\n  data:\n    url: {}\n",
            dir.path().join("ledger").display(),
            dir.path().join("data").display(),
        ))?;

        let trigger = br#"{"executionId": "cli-copy", "srcPath": "s3://data/in", "dstPath": "s3://data/out"}"#;
        let report = run_scan(&config, trigger, Some(1)).await?;
        assert_eq!(report.status, TaskStatus::Succeeded, "{}", report.text);
        assert_eq!(fs::read_to_string(dir.path().join("data/out/x.log"))?, "x\n");

        // Same group delivered again
        let message = serde_json::json!({
            "executionId": "cli-copy",
            "taskId": "group-00000",
            "parentTaskId": ROOT_TASK_ID,
            "sourceType": "s3",
            "data": [{
                "source": {"location": "data", "key": "in/x.log"},
                "destination": {"location": "data", "key": "out/x.log"}
            }],
            "deleteOnSuccess": false,
            "merge": false
        });
        let output = migrate_command_as_string(&config, &serde_json::to_vec(&message)?).await?;
        assert!(output.starts_with("Task group-00000: Succeeded"), "{output}");
        assert!(output.contains("(redelivered)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_message_for_unknown_batch_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = parse_config(&format!(
            "ledger:\n  url: {}\nstores:\n  data:\n    url: memory://\n",
            dir.path().join("ledger").display(),
        ))?;
        let message = br#"{
            "executionId": "never-scanned",
            "taskId": "group-00000",
            "parentTaskId": "root",
            "data": [],
            "merge": false
        }"#;
        assert!(migrate_command_as_string(&config, message).await.is_err());
        Ok(())
    }
}
