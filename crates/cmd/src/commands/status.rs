use crate::config::ReorgConfig;
use anyhow::{Result, anyhow};
use ledger::{ERROR, FAILED_TASK_IDS, StatusCounts, TOTAL_SUB_TASK, TaskLogEntry};
use std::collections::BTreeMap;
use std::fmt::Write;

#[allow(clippy::print_stdout)]
pub async fn status_command(config: &ReorgConfig, execution_id: &str) -> Result<()> {
    let output = status_command_as_string(config, execution_id).await?;
    print!("{}", output);
    Ok(())
}

/// Render the ledger rows of one batch as a tree under its root
pub async fn status_command_as_string(config: &ReorgConfig, execution_id: &str) -> Result<String> {
    let runtime = config.open()?;
    let entries = runtime.ledger.list_execution(execution_id).await?;
    if entries.is_empty() {
        return Err(anyhow!("No ledger entries for batch {}", execution_id));
    }

    let mut children: BTreeMap<Option<&str>, Vec<&TaskLogEntry>> = BTreeMap::new();
    for entry in &entries {
        children
            .entry(entry.parent_task_id.as_deref())
            .or_default()
            .push(entry);
    }

    let mut output = String::new();
    writeln!(output, "=== Batch {} ===", execution_id)?;
    let roots = children.get(&None).cloned().unwrap_or_default();
    for root in roots {
        write_tree(&mut output, root, &children, 0)?;
    }

    let counts = StatusCounts::from_entries(entries.iter().filter(|e| !e.is_root()));
    writeln!(
        output,
        "Tasks: {} running, {} succeeded, {} failed",
        counts.running, counts.succeeded, counts.failed
    )?;
    Ok(output)
}

fn write_tree(
    output: &mut String,
    entry: &TaskLogEntry,
    children: &BTreeMap<Option<&str>, Vec<&TaskLogEntry>>,
    depth: usize,
) -> Result<()> {
    write!(
        output,
        "{:indent$}{} {} [{}]",
        "",
        entry.task_id,
        entry.status,
        entry.function_name,
        indent = depth * 2
    )?;
    if let Some(end) = entry.end_time {
        let millis = (end - entry.start_time) / 1000;
        write!(output, " {}.{:03}s", millis / 1000, millis % 1000)?;
    }
    if let Some(total) = entry.total_sub_task() {
        write!(output, " {}={}", TOTAL_SUB_TASK, total)?;
    }
    for field in ["objects", "bytesWritten"] {
        if let Some(value) = entry.data.get(field) {
            write!(output, " {}={}", field, value)?;
        }
    }
    let failed = entry.failed_task_ids();
    if !failed.is_empty() {
        write!(output, " {}={}", FAILED_TASK_IDS, failed.join(","))?;
    }
    if let Some(error) = entry.data.get(ERROR).and_then(|v| v.as_str()) {
        write!(output, " {}: {}", ERROR, error)?;
    }
    writeln!(output)?;

    if let Some(kids) = children.get(&Some(entry.task_id.as_str())) {
        for child in kids {
            write_tree(output, child, children, depth + 1)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::scan::run_scan;
    use crate::config::parse_config;
    use std::fs;

    #[tokio::test]
    async fn test_status_shows_failed_group_under_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("data/in"))?;
        fs::write(dir.path().join("data/in/a.parquet"), "not parquet")?;
        fs::write(dir.path().join("data/in/b.parquet"), "also not parquet")?;
        let config = parse_config(&format!(
            "ledger:\n  url: {}\nstores:\n  data:\n    url: {}\n",
            dir.path().join("ledger").display(),
            dir.path().join("data").display(),
        ))?;

        let trigger = br#"{
            "executionId": "cli-status",
            "srcPath": "s3://data/in",
            "dstPath": "s3://data/out",
            "merge": true
        }"#;
        let report = run_scan(&config, trigger, None).await?;
        assert_eq!(report.status, ledger::TaskStatus::Failed, "{}", report.text);

        let output = status_command_as_string(&config, "cli-status").await?;
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "=== Batch cli-status ===");
        assert!(lines[1].starts_with("root Failed [reorg-scanner]"), "{output}");
        assert!(lines[1].contains("failedTaskIds=group-00000"), "{output}");
        assert!(lines[2].starts_with("  group-00000 Failed [reorg-worker]"), "{output}");
        assert!(lines[2].contains("error: "), "{output}");
        assert_eq!(lines[3], "Tasks: 0 running, 0 succeeded, 1 failed");

        assert!(status_command_as_string(&config, "no-such-batch").await.is_err());
        Ok(())
    }
}
