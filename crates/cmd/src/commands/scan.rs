use crate::commands::write_callbacks;
use crate::config::ReorgConfig;
use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use ledger::{FAILED_TASK_IDS, TaskStatus};
use log::{error, info};
use reorg::scanner::{SCANNER_FUNCTION, WORKER_FUNCTION};
use reorg::{
    ChannelQueue, MigrationOutcome, MigrationWorker, ROOT_TASK_ID, ScanRequest, Scanner,
    format_size,
};
use serde_json::Value;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

/// What one batch run produced
#[derive(Debug)]
pub struct ScanReport {
    pub execution_id: String,
    pub status: TaskStatus,
    pub text: String,
}

#[allow(clippy::print_stdout)]
pub async fn scan_command(
    config: &ReorgConfig,
    trigger: &Path,
    workers: Option<usize>,
) -> Result<()> {
    let body = std::fs::read(trigger)
        .with_context(|| format!("Failed to read trigger: {}", trigger.display()))?;
    let report = run_scan(config, &body, workers).await?;
    print!("{}", report.text);
    if report.status == TaskStatus::Failed {
        return Err(anyhow!("Batch {} failed", report.execution_id));
    }
    Ok(())
}

/// Fill in an execution id when the trigger has none
pub fn prepare_trigger(body: &[u8]) -> Result<ScanRequest> {
    let mut value: Value =
        serde_json::from_slice(body).with_context(|| "Trigger is not valid JSON")?;
    if let Value::Object(fields) = &mut value {
        let missing = fields
            .get("executionId")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty);
        if missing {
            let id = uuid7::uuid7().to_string();
            info!("Trigger has no executionId; using {}", id);
            let _ = fields.insert("executionId".to_string(), Value::String(id));
        }
    }
    Ok(ScanRequest::from_value(value)?)
}

/// Scan, then run every dispatched task through a local worker pool
pub async fn run_scan(
    config: &ReorgConfig,
    body: &[u8],
    workers: Option<usize>,
) -> Result<ScanReport> {
    let request = prepare_trigger(body)?;
    let workers = workers.unwrap_or(config.workers).max(1);
    let runtime = config.open()?;
    let scanner_function = config.scanner_function.as_deref().unwrap_or(SCANNER_FUNCTION);
    let worker_function = config.worker_function.as_deref().unwrap_or(WORKER_FUNCTION);

    let (queue, mut receiver) = ChannelQueue::new();
    let scanner = Scanner::new(runtime.stores.clone(), runtime.tracker(), Arc::new(queue))
        .with_function_names(scanner_function, worker_function);

    let mut text = String::new();
    let scanned = scanner.scan(&request).await;
    // Whatever was dispatched before a failure still runs
    let messages = receiver.drain();
    match &scanned {
        Ok(outcome) => writeln!(
            text,
            "Batch {}: {} objects ({}) in {} tasks",
            outcome.execution_id,
            outcome.objects,
            format_size(outcome.bytes),
            outcome.task_ids.len()
        )?,
        Err(e) => {
            error!("Scan of {} failed: {}", request.src_path, e);
            writeln!(text, "Batch {}: scan failed: {}", request.execution_id, e)?;
        }
    }

    let worker = MigrationWorker::new(runtime.stores.clone(), runtime.tracker())
        .with_function_name(worker_function);
    let worker = &worker;
    let mut results: Vec<(usize, reorg::Result<MigrationOutcome>)> =
        futures::stream::iter(messages.into_iter().enumerate())
            .map(|(index, body)| async move { (index, worker.handle_message(&body).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
    results.sort_by_key(|(index, _)| *index);

    for (index, result) in &results {
        match result {
            Ok(outcome) => writeln!(
                text,
                "Task {}: {}, {} objects, {} written{}",
                outcome.task_id,
                outcome.status,
                outcome.objects,
                format_size(outcome.bytes_written),
                if outcome.redelivered { " (redelivered)" } else { "" }
            )?,
            Err(e) => writeln!(text, "Task #{}: {}", index, e)?,
        }
    }

    let root = runtime
        .ledger
        .get(&request.execution_id, ROOT_TASK_ID)
        .await?;
    write!(text, "Batch {}: {}", root.execution_id, root.status)?;
    let failed = root.failed_task_ids();
    if !failed.is_empty() {
        write!(text, " ({}: {})", FAILED_TASK_IDS, failed.join(", "))?;
    }
    writeln!(text)?;
    write_callbacks(&mut text, &runtime.orchestrator).await?;

    Ok(ScanReport {
        execution_id: root.execution_id,
        status: root.status,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::fs;

    fn local_config(root: &Path) -> Result<ReorgConfig> {
        fs::create_dir_all(root.join("src/in/2024"))?;
        parse_config(&format!(
            "ledger:\n  url: {}\nstores:\n  src:\n    url: {}\n  dst:\n    url: {}\nworkers: 2\n",
            root.join("ledger").display(),
            root.join("src").display(),
            root.join("dst").display(),
        ))
    }

    #[tokio::test]
    async fn test_trigger_gets_an_execution_id() -> Result<()> {
        let request = prepare_trigger(br#"{"srcPath": "s3://src/in"}"#)?;
        assert!(!request.execution_id.is_empty());
        assert_eq!(request.dst_path, request.src_path);

        let request = prepare_trigger(br#"{"executionId": "b-1", "srcPath": "s3://src/in"}"#)?;
        assert_eq!(request.execution_id, "b-1");

        assert!(prepare_trigger(b"[1, 2").is_err());
        assert!(prepare_trigger(br#"{"executionId": "b-2"}"#).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_merges_and_moves_local_objects() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = local_config(dir.path())?;
        fs::write(dir.path().join("src/in/2024/a.csv"), "a,1\n")?;
        fs::write(dir.path().join("src/in/2024/b.csv"), "b,2\n")?;

        let trigger = br#"{
            "executionId": "cli-merge",
            "srcPath": "s3://src/in",
            "dstPath": "s3://dst/out",
            "merge": true,
            "deleteOnSuccess": true,
            "taskToken": "token-1"
        }"#;
        let report = run_scan(&config, trigger, None).await?;
        assert_eq!(report.status, TaskStatus::Succeeded, "{}", report.text);
        assert!(report.text.contains("Batch cli-merge: Succeeded"));
        assert!(report.text.contains("Callback token-1: success"));

        let merged: Vec<_> = fs::read_dir(dir.path().join("dst/out/2024"))?
            .collect::<std::io::Result<_>>()?;
        assert_eq!(merged.len(), 1);
        assert_eq!(fs::read_to_string(merged[0].path())?, "a,1\nb,2\n");
        assert!(!dir.path().join("src/in/2024/a.csv").exists());
        assert!(!dir.path().join("src/in/2024/b.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_of_unknown_location_fails_the_batch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = local_config(dir.path())?;
        let trigger = br#"{"executionId": "cli-bad", "srcPath": "s3://nowhere/in", "taskToken": "token-2"}"#;

        let report = run_scan(&config, trigger, Some(1)).await?;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.text.contains("scan failed"));
        assert!(report.text.contains("Callback token-2: failure"));
        Ok(())
    }
}
