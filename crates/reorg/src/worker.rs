//! Migration worker: one request, one ledger row
//!
//! Data movement is fail-fast. The first pair that cannot be moved fails the
//! request, and the row is written Failed before the error is returned.
//! Sources are deleted only after their destination write returned.
//! Redelivered messages are safe: destination writes overwrite, a terminal
//! row skips straight to the completion check, and a source that is gone
//! while its destination exists counts as already moved.

use crate::error::{Error, ParameterError, Result};
use crate::location::ObjectStores;
use crate::merge::MergeRegistry;
use crate::params::{MigrationRequest, ObjectRef};
use crate::scanner::WORKER_FUNCTION;
use crate::size::format_size;
use ledger::{
    CompletionTracker, ERROR, LedgerError, TASK_TOKEN, TaskLedger, TaskLogEntry, TaskStatus,
};
use log::{debug, error, info};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    /// Source objects processed by this invocation
    pub objects: usize,
    pub bytes_written: u64,
    /// The row was already terminal; no data was moved
    pub redelivered: bool,
    /// Ancestors this invocation finalized
    pub finalized: Vec<TaskLogEntry>,
}

#[derive(Debug, Default)]
struct MoveStats {
    objects: usize,
    bytes_written: u64,
    already_moved: usize,
}

pub struct MigrationWorker {
    stores: ObjectStores,
    tracker: CompletionTracker,
    merges: Arc<MergeRegistry>,
    function_name: String,
}

impl MigrationWorker {
    pub fn new(stores: ObjectStores, tracker: CompletionTracker) -> Self {
        Self {
            stores,
            tracker,
            merges: Arc::new(MergeRegistry::default()),
            function_name: WORKER_FUNCTION.to_string(),
        }
    }

    #[must_use]
    pub fn with_merge_registry(mut self, merges: MergeRegistry) -> Self {
        self.merges = Arc::new(merges);
        self
    }

    #[must_use]
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Parse and process one queue message
    pub async fn handle_message(&self, body: &[u8]) -> Result<MigrationOutcome> {
        let request = MigrationRequest::from_json(body)?;
        self.process(&request).await
    }

    pub async fn process(&self, request: &MigrationRequest) -> Result<MigrationOutcome> {
        let execution_id = request.execution_id.as_str();
        let task_id = request.task_id.as_str();

        if let Some(entry) = self.claim(request).await? {
            info!(
                "Task {} is already {}; rechecking completion",
                task_id, entry.status
            );
            let finalized = self
                .tracker
                .check_and_propagate(execution_id, task_id)
                .await?;
            return Ok(MigrationOutcome {
                task_id: task_id.to_string(),
                status: entry.status,
                objects: 0,
                bytes_written: 0,
                redelivered: true,
                finalized,
            });
        }

        if !request.enrichment_plugins.is_empty() {
            info!(
                "Task {}: enrichment plugins {:?} are not executed",
                task_id, request.enrichment_plugins
            );
        }
        info!(
            "Task {}: {} {} objects",
            task_id,
            if request.merge { "merging" } else { "copying" },
            request.data.len()
        );

        let moved = if request.merge {
            self.merge_pairs(request).await
        } else {
            self.copy_pairs(request).await
        };

        match moved {
            Ok(stats) => {
                info!(
                    "Task {} moved {} objects, wrote {}",
                    task_id,
                    stats.objects,
                    format_size(stats.bytes_written)
                );
                let done = self
                    .tracker
                    .complete(
                        execution_id,
                        task_id,
                        TaskStatus::Succeeded,
                        json!({
                            "objects": stats.objects,
                            "bytesWritten": stats.bytes_written,
                            "alreadyMoved": stats.already_moved,
                        }),
                    )
                    .await?;
                Ok(MigrationOutcome {
                    task_id: task_id.to_string(),
                    status: done.transition.entry().status,
                    objects: stats.objects,
                    bytes_written: stats.bytes_written,
                    redelivered: false,
                    finalized: done.finalized,
                })
            }
            // Unrecorded; left for redelivery
            Err(e) if e.is_ledger() => Err(e),
            Err(e) => {
                error!("Task {} failed: {}", task_id, e);
                let _ = self
                    .tracker
                    .complete(
                        execution_id,
                        task_id,
                        TaskStatus::Failed,
                        json!({ ERROR: e.to_string() }),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Make sure this task's row exists and is Running.
    ///
    /// Returns the stored entry when it is already terminal.
    async fn claim(&self, request: &MigrationRequest) -> Result<Option<TaskLogEntry>> {
        let ledger = self.tracker.ledger();
        let execution_id = request.execution_id.as_str();
        let task_id = request.task_id.as_str();

        let entry = match ledger.get(execution_id, task_id).await {
            Ok(entry) => entry,
            Err(e) if e.is_not_found() => {
                // The parent must exist for completion to propagate
                let _ = ledger.get(execution_id, &request.parent_task_id).await?;
                let entry = TaskLogEntry::running(
                    execution_id,
                    task_id,
                    Some(request.parent_task_id.clone()),
                    self.function_name.as_str(),
                    json!({ TASK_TOKEN: request.task_token }),
                );
                match ledger.create(&entry).await {
                    Ok(()) => {
                        debug!("Created ledger row for task {}", task_id);
                        return Ok(None);
                    }
                    Err(LedgerError::AlreadyExists { .. }) => {
                        ledger.get(execution_id, task_id).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if entry.is_terminal() {
            return Ok(Some(entry));
        }
        if let Some(token) = request.task_token.as_deref() {
            if entry.task_token() != Some(token) {
                let _ = ledger
                    .update_data(execution_id, task_id, json!({ TASK_TOKEN: token }))
                    .await?;
            }
        }
        Ok(None)
    }

    async fn copy_pairs(&self, request: &MigrationRequest) -> Result<MoveStats> {
        let mut stats = MoveStats::default();
        for pair in &request.data {
            if pair.source == pair.destination {
                debug!("{} is already in place", pair.source);
                stats.objects += 1;
                continue;
            }
            let src_store = self.stores.get(&pair.source.location)?;
            let dst_store = self.stores.get(&pair.destination.location)?;
            let src = object_path(&pair.source)?;
            let dst = object_path(&pair.destination)?;

            let bytes = match src_store.get(&src).await {
                Ok(result) => result
                    .bytes()
                    .await
                    .map_err(|e| Error::object_io(&pair.source.location, &pair.source.key, e))?,
                Err(err @ object_store::Error::NotFound { .. }) => {
                    if request.delete_on_success
                        && exists(dst_store.as_ref(), &pair.destination, &dst).await?
                    {
                        debug!("{} was already moved to {}", pair.source, pair.destination);
                        stats.already_moved += 1;
                        stats.objects += 1;
                        continue;
                    }
                    return Err(Error::object_io(
                        &pair.source.location,
                        &pair.source.key,
                        err,
                    ));
                }
                Err(e) => {
                    return Err(Error::object_io(&pair.source.location, &pair.source.key, e));
                }
            };

            let written = bytes.len() as u64;
            let _ = dst_store
                .put(&dst, PutPayload::from(bytes))
                .await
                .map_err(|e| {
                    Error::object_io(&pair.destination.location, &pair.destination.key, e)
                })?;
            debug!("Copied {} to {}", pair.source, pair.destination);
            stats.objects += 1;
            stats.bytes_written += written;

            if request.delete_on_success {
                delete_source(src_store.as_ref(), &pair.source, &src).await?;
            }
        }
        Ok(stats)
    }

    async fn merge_pairs(&self, request: &MigrationRequest) -> Result<MoveStats> {
        // Destinations in order of first appearance, sources in group order
        let mut merges: Vec<(&ObjectRef, Vec<&ObjectRef>)> = Vec::new();
        for pair in &request.data {
            match merges.iter_mut().find(|(d, _)| *d == &pair.destination) {
                Some((_, sources)) => sources.push(&pair.source),
                None => merges.push((&pair.destination, vec![&pair.source])),
            }
        }

        let mut stats = MoveStats::default();
        for (destination, sources) in merges {
            self.merge_into(request, destination, &sources, &mut stats)
                .await?;
        }
        Ok(stats)
    }

    async fn merge_into(
        &self,
        request: &MigrationRequest,
        destination: &ObjectRef,
        sources: &[&ObjectRef],
        stats: &mut MoveStats,
    ) -> Result<()> {
        let dst_store = self.stores.get(&destination.location)?;
        let dst = object_path(destination)?;

        let mut parts = Vec::with_capacity(sources.len());
        for source in sources {
            let store = self.stores.get(&source.location)?;
            let path = object_path(source)?;
            match store.get(&path).await {
                Ok(result) => parts.push(
                    result
                        .bytes()
                        .await
                        .map_err(|e| Error::object_io(&source.location, &source.key, e))?,
                ),
                Err(err @ object_store::Error::NotFound { .. }) => {
                    if request.delete_on_success
                        && exists(dst_store.as_ref(), destination, &dst).await?
                    {
                        info!(
                            "{} was already merged; removing remaining sources",
                            destination
                        );
                        for source in sources {
                            let store = self.stores.get(&source.location)?;
                            delete_source(store.as_ref(), source, &object_path(source)?).await?;
                        }
                        stats.objects += sources.len();
                        stats.already_moved += sources.len();
                        return Ok(());
                    }
                    return Err(Error::object_io(&source.location, &source.key, err));
                }
                Err(e) => return Err(Error::object_io(&source.location, &source.key, e)),
            }
        }

        let Some(first) = sources.first() else {
            return Ok(());
        };
        let strategy = self.merges.strategy_for(&first.key);
        let merged = strategy.merge(&destination.to_string(), &parts)?;
        let written = merged.len() as u64;
        let _ = dst_store
            .put(&dst, PutPayload::from(merged))
            .await
            .map_err(|e| Error::object_io(&destination.location, &destination.key, e))?;
        debug!(
            "Merged {} sources into {} with {} ({})",
            sources.len(),
            destination,
            strategy.name(),
            format_size(written)
        );
        stats.objects += sources.len();
        stats.bytes_written += written;

        if request.delete_on_success {
            for source in sources.iter().filter(|s| **s != destination) {
                let store = self.stores.get(&source.location)?;
                delete_source(store.as_ref(), source, &object_path(source)?).await?;
            }
        }
        Ok(())
    }
}

fn object_path(object: &ObjectRef) -> Result<Path> {
    Path::parse(&object.key).map_err(|e| {
        Error::Parameter(ParameterError::invalid(
            "data",
            format!("bad object key {object}: {e}"),
        ))
    })
}

async fn exists(store: &dyn ObjectStore, object: &ObjectRef, path: &Path) -> Result<bool> {
    match store.head(path).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(Error::object_io(&object.location, &object.key, e)),
    }
}

async fn delete_source(store: &dyn ObjectStore, object: &ObjectRef, path: &Path) -> Result<()> {
    match store.delete(path).await {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => {
            debug!("Deleted source {}", object);
            Ok(())
        }
        Err(e) => Err(Error::object_io(&object.location, &object.key, e)),
    }
}
