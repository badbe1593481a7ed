//! Ledger persisted as one JSON object per task on an object store
//!
//! Layout under `<prefix>/<executionId>/`:
//!
//! - `<taskId>.json`: the entry
//! - `<taskId>.terminal`: terminal claim, on stores without conditional update
//! - `children/<parentTaskId>/<taskId>.<status>`: empty per-parent status index
//!
//! Read-modify-write uses `PutMode::Update` against the e-tag observed at read
//! time. A lost race surfaces as `Precondition` and the write is retried from a
//! fresh read, so exactly one writer moves an entry to terminal. Stores without
//! conditional update (`LocalFileSystem`) fall back to plain overwrites for data
//! patches, and a terminal transition is claimed by creating the `.terminal`
//! object with `PutMode::Create`. Only the creator reports `Applied`; the claim
//! is read in preference to a Running entry.
//!
//! The status index lets `count_by_status` list one parent's markers instead of
//! reading every entry of the execution. A task may have several markers while
//! it moves; the most advanced one wins.

use crate::entry::{StatusCounts, TaskLogEntry, TaskStatus, Transition};
use crate::{LedgerError, Result, TaskLedger};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use log::{debug, warn};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Concurrent entry reads while listing an execution
const LIST_READ_CONCURRENCY: usize = 16;

const ENTRY_SUFFIX: &str = "json";
const CLAIM_SUFFIX: &str = "terminal";
const CHILDREN_DIR: &str = "children";

pub struct ObjectStoreLedger {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    conditional: AtomicBool,
}

enum Edit<T> {
    Write(T),
    Skip(T),
}

fn marker_suffix(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
    }
}

fn parse_marker_suffix(suffix: &str) -> Option<TaskStatus> {
    match suffix {
        "running" => Some(TaskStatus::Running),
        "succeeded" => Some(TaskStatus::Succeeded),
        "failed" => Some(TaskStatus::Failed),
        _ => None,
    }
}

fn rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Running => 0,
        TaskStatus::Succeeded => 1,
        TaskStatus::Failed => 2,
    }
}

impl ObjectStoreLedger {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path) -> Self {
        Self {
            store,
            prefix,
            conditional: AtomicBool::new(true),
        }
    }

    fn execution_path(&self, execution_id: &str) -> Path {
        self.prefix.child(execution_id)
    }

    fn entry_path(&self, execution_id: &str, task_id: &str) -> Path {
        self.execution_path(execution_id)
            .child(format!("{task_id}.{ENTRY_SUFFIX}"))
    }

    fn claim_path(&self, execution_id: &str, task_id: &str) -> Path {
        self.execution_path(execution_id)
            .child(format!("{task_id}.{CLAIM_SUFFIX}"))
    }

    fn children_path(&self, execution_id: &str, parent_task_id: &str) -> Path {
        self.execution_path(execution_id)
            .child(CHILDREN_DIR)
            .child(parent_task_id)
    }

    fn marker_path(&self, entry: &TaskLogEntry, parent: &str, status: TaskStatus) -> Path {
        self.children_path(&entry.execution_id, parent)
            .child(format!("{}.{}", entry.task_id, marker_suffix(status)))
    }

    async fn load(
        &self,
        execution_id: &str,
        task_id: &str,
    ) -> Result<(TaskLogEntry, UpdateVersion)> {
        let path = self.entry_path(execution_id, task_id);
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(LedgerError::not_found(execution_id, task_id));
            }
            Err(e) => return Err(e.into()),
        };
        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        let bytes = result.bytes().await?;
        let entry: TaskLogEntry = serde_json::from_slice(&bytes)?;
        if entry.is_terminal() {
            return Ok((entry, version));
        }

        // A claimed transition may not have reached the entry yet
        let claim = self.claim_path(execution_id, task_id);
        match self.read_optional(&claim).await? {
            Some(claimed) => Ok((claimed, version)),
            None => Ok((entry, version)),
        }
    }

    /// Read, apply `edit`, and write back guarded by the read version
    async fn read_modify_write<T, F>(
        &self,
        execution_id: &str,
        task_id: &str,
        mut edit: F,
    ) -> Result<T>
    where
        F: FnMut(&mut TaskLogEntry) -> Result<Edit<T>> + Send,
        T: Send,
    {
        let path = self.entry_path(execution_id, task_id);
        loop {
            let (mut entry, version) = self.load(execution_id, task_id).await?;
            let outcome = match edit(&mut entry)? {
                Edit::Skip(outcome) => return Ok(outcome),
                Edit::Write(outcome) => outcome,
            };

            let conditional = self.conditional.load(Ordering::Relaxed);
            let opts = if conditional {
                PutOptions::from(PutMode::Update(version))
            } else {
                PutOptions::default()
            };
            let payload = PutPayload::from(serde_json::to_vec(&entry)?);

            match self.store.put_opts(&path, payload, opts).await {
                Ok(_) => return Ok(outcome),
                Err(object_store::Error::Precondition { .. }) => {
                    debug!("Ledger entry {} changed concurrently, retrying", path);
                }
                Err(object_store::Error::NotImplemented { .. }) if conditional => {
                    self.disable_conditional();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn disable_conditional(&self) {
        warn!(
            "Object store does not support conditional updates; ledger at {} claims terminal writes instead",
            self.prefix
        );
        self.conditional.store(false, Ordering::Relaxed);
    }

    /// Claim the terminal transition by creating its marker, then write the entry
    async fn finish_claimed(&self, entry: &TaskLogEntry, body: Vec<u8>) -> Result<Transition> {
        let claim = self.claim_path(&entry.execution_id, &entry.task_id);
        match self
            .store
            .put_opts(&claim, PutPayload::from(body.clone()), PutMode::Create.into())
            .await
        {
            Ok(_) => {
                let path = self.entry_path(&entry.execution_id, &entry.task_id);
                let _ = self.store.put(&path, PutPayload::from(body)).await?;
                Ok(Transition::Applied(entry.clone()))
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                debug!("Terminal claim {} already taken", claim);
                let (stored, _) = self.load(&entry.execution_id, &entry.task_id).await?;
                Ok(Transition::AlreadyTerminal(stored))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record `status` for `entry` in its parent's index
    async fn mark_child(&self, entry: &TaskLogEntry, status: TaskStatus) -> Result<()> {
        if let Some(parent) = &entry.parent_task_id {
            let path = self.marker_path(entry, parent, status);
            let _ = self.store.put(&path, PutPayload::new()).await?;
        }
        Ok(())
    }

    async fn unmark_child(&self, entry: &TaskLogEntry, status: TaskStatus) -> Result<()> {
        if let Some(parent) = &entry.parent_task_id {
            let path = self.marker_path(entry, parent, status);
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Most advanced indexed status per child, keyed by the encoded task id
    async fn indexed_children(
        &self,
        execution_id: &str,
        parent_task_id: &str,
    ) -> Result<BTreeMap<String, TaskStatus>> {
        let prefix = self.children_path(execution_id, parent_task_id);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut children: BTreeMap<String, TaskStatus> = BTreeMap::new();
        for meta in metas {
            let Some((task, status)) = meta
                .location
                .filename()
                .and_then(|name| name.rsplit_once('.'))
                .and_then(|(task, suffix)| Some((task, parse_marker_suffix(suffix)?)))
            else {
                continue;
            };
            let slot = children.entry(task.to_string()).or_insert(status);
            if rank(status) > rank(*slot) {
                *slot = status;
            }
        }
        Ok(children)
    }

    /// Entry at `path`, with a pending terminal claim applied
    async fn read_child(&self, path: &Path) -> Result<Option<TaskLogEntry>> {
        let Some(entry) = self.read_optional(path).await? else {
            return Ok(None);
        };
        if entry.is_terminal() {
            return Ok(Some(entry));
        }
        let claim = self.claim_path(&entry.execution_id, &entry.task_id);
        Ok(Some(self.read_optional(&claim).await?.unwrap_or(entry)))
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<TaskLogEntry>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            // Removed between list and get
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TaskLedger for ObjectStoreLedger {
    async fn create(&self, entry: &TaskLogEntry) -> Result<()> {
        let path = self.entry_path(&entry.execution_id, &entry.task_id);
        let body = serde_json::to_vec(entry)?;
        debug!("Creating ledger entry {}", path);
        // Indexed first: an entry the index does not name is never counted
        self.mark_child(entry, entry.status).await?;

        match self
            .store
            .put_opts(&path, PutPayload::from(body.clone()), PutMode::Create.into())
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => Err(LedgerError::already_exists(
                &entry.execution_id,
                &entry.task_id,
            )),
            Err(object_store::Error::NotImplemented { .. }) => {
                match self.store.head(&path).await {
                    Ok(_) => Err(LedgerError::already_exists(
                        &entry.execution_id,
                        &entry.task_id,
                    )),
                    Err(object_store::Error::NotFound { .. }) => {
                        let _ = self.store.put(&path, PutPayload::from(body)).await?;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, execution_id: &str, task_id: &str) -> Result<TaskLogEntry> {
        Ok(self.load(execution_id, task_id).await?.0)
    }

    async fn update_data(
        &self,
        execution_id: &str,
        task_id: &str,
        patch: Value,
    ) -> Result<TaskLogEntry> {
        self.read_modify_write(execution_id, task_id, |entry| {
            if entry.is_terminal() {
                return Err(LedgerError::terminal(execution_id, task_id));
            }
            entry.merge_data(patch.clone());
            Ok(Edit::Write(entry.clone()))
        })
        .await
    }

    async fn finish(
        &self,
        execution_id: &str,
        task_id: &str,
        status: TaskStatus,
        patch: Value,
    ) -> Result<Transition> {
        let path = self.entry_path(execution_id, task_id);
        let mut marked = false;
        let transition = loop {
            let (mut entry, version) = self.load(execution_id, task_id).await?;
            if entry.is_terminal() {
                break Transition::AlreadyTerminal(entry);
            }
            entry.finish(status, patch.clone());
            let body = serde_json::to_vec(&entry)?;

            // Indexed before the entry turns terminal, so a sibling counting
            // the index never misses a finished child
            if !marked {
                self.mark_child(&entry, status).await?;
                marked = true;
            }

            if !self.conditional.load(Ordering::Relaxed) {
                break self.finish_claimed(&entry, body).await?;
            }
            let opts = PutOptions::from(PutMode::Update(version));
            match self.store.put_opts(&path, PutPayload::from(body), opts).await {
                Ok(_) => break Transition::Applied(entry),
                Err(object_store::Error::Precondition { .. }) => {
                    debug!("Ledger entry {} changed concurrently, retrying", path);
                }
                Err(object_store::Error::NotImplemented { .. }) => self.disable_conditional(),
                Err(e) => return Err(e.into()),
            }
        };

        if let Transition::AlreadyTerminal(stored) = &transition {
            // Repair the index after a crash, and drop a losing marker
            self.mark_child(stored, stored.status).await?;
            if marked && stored.status != status {
                self.unmark_child(stored, status).await?;
            }
        }
        Ok(transition)
    }

    async fn list_execution(&self, execution_id: &str) -> Result<Vec<TaskLogEntry>> {
        let prefix = self.execution_path(execution_id);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        let entry_suffix = format!(".{ENTRY_SUFFIX}");

        let loaded: Vec<Option<TaskLogEntry>> = futures::stream::iter(
            metas
                .into_iter()
                .filter(|meta| meta.location.as_ref().ends_with(&entry_suffix)),
        )
        .map(|meta| async move { self.read_child(&meta.location).await })
        .buffer_unordered(LIST_READ_CONCURRENCY)
        .try_collect()
        .await?;

        let mut entries: Vec<TaskLogEntry> = loaded
            .into_iter()
            .flatten()
            .filter(|e| e.execution_id == execution_id)
            .collect();
        entries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(entries)
    }

    /// Reads only the children named in the parent's index
    async fn list_children(
        &self,
        execution_id: &str,
        parent_task_id: &str,
    ) -> Result<Vec<TaskLogEntry>> {
        let indexed = self.indexed_children(execution_id, parent_task_id).await?;
        let execution = self.execution_path(execution_id);
        let paths = indexed
            .into_keys()
            .map(|task| Path::parse(format!("{execution}/{task}.{ENTRY_SUFFIX}")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| object_store::Error::InvalidPath { source })?;

        let loaded: Vec<Option<TaskLogEntry>> = futures::stream::iter(paths)
            .map(|path| async move { self.read_child(&path).await })
            .buffer_unordered(LIST_READ_CONCURRENCY)
            .try_collect()
            .await?;

        let mut entries: Vec<TaskLogEntry> = loaded
            .into_iter()
            .flatten()
            .filter(|e| {
                e.execution_id == execution_id
                    && e.parent_task_id.as_deref() == Some(parent_task_id)
            })
            .collect();
        entries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(entries)
    }

    /// Counts from the parent's status index, without reading any entry
    async fn count_by_status(
        &self,
        execution_id: &str,
        parent_task_id: &str,
    ) -> Result<StatusCounts> {
        let indexed = self.indexed_children(execution_id, parent_task_id).await?;
        let mut counts = StatusCounts::default();
        for status in indexed.into_values() {
            match status {
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
