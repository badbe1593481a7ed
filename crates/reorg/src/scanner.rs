//! Scanner: source listing to dispatched work units
//!
//! Creates the root ledger row first, so every failure after that point is
//! recorded on it. Groups are created in the ledger before any message is
//! sent; a worker can therefore never finish ahead of a sibling's row.

use crate::error::{Error, Result};
use crate::location::ObjectStores;
use crate::params::{MigrationRequest, ObjectPair, ObjectRef, ScanRequest};
use crate::queue::Dispatcher;
use crate::size::format_size;
use futures::TryStreamExt;
use ledger::{
    CompletionTracker, ERROR, TASK_TOKEN, TOTAL_SUB_TASK, TaskLedger, TaskLogEntry, TaskStatus,
};
use log::{debug, error, info};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const ROOT_TASK_ID: &str = "root";
pub const SCANNER_FUNCTION: &str = "reorg-scanner";
pub const WORKER_FUNCTION: &str = "reorg-worker";

/// Placeholder object some stores keep for empty directories
const FOLDER_MARKER_SUFFIX: &str = "_$folder$";

/// One listed object with its destination already computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedObject {
    pub source: Path,
    pub size: u64,
    pub destination: Path,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub execution_id: String,
    pub root_task_id: String,
    /// Root status when the scan returned; workers may finish it later
    pub status: TaskStatus,
    pub objects: usize,
    pub bytes: u64,
    pub task_ids: Vec<String>,
}

pub struct Scanner {
    stores: ObjectStores,
    tracker: CompletionTracker,
    dispatcher: Arc<dyn Dispatcher>,
    scanner_function: String,
    worker_function: String,
}

impl Scanner {
    pub fn new(
        stores: ObjectStores,
        tracker: CompletionTracker,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            stores,
            tracker,
            dispatcher,
            scanner_function: SCANNER_FUNCTION.to_string(),
            worker_function: WORKER_FUNCTION.to_string(),
        }
    }

    /// Function names recorded on the root and group rows
    #[must_use]
    pub fn with_function_names(
        mut self,
        scanner: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        self.scanner_function = scanner.into();
        self.worker_function = worker.into();
        self
    }

    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome> {
        let execution_id = request.execution_id.as_str();
        let ledger = self.tracker.ledger();

        let root = TaskLogEntry::running(
            execution_id,
            ROOT_TASK_ID,
            None,
            self.scanner_function.as_str(),
            json!({
                TASK_TOKEN: request.task_token,
                "srcPath": request.src_path.to_string(),
                "dstPath": request.dst_path.to_string(),
                "merge": request.merge,
                "deleteOnSuccess": request.delete_on_success,
            }),
        );
        ledger.create(&root).await?;
        info!(
            "Scanning {} into {} for batch {}",
            request.src_path, request.dst_path, execution_id
        );
        if !request.enrichment_plugins.is_empty() {
            info!(
                "Enrichment plugins {:?} are passed through to workers",
                request.enrichment_plugins
            );
        }

        let groups = match self.plan(request).await {
            Ok(groups) => groups,
            Err(e) => {
                self.fail_root(execution_id, &e).await?;
                return Err(e);
            }
        };
        let objects: usize = groups.iter().map(Vec::len).sum();
        let bytes: u64 = groups.iter().flatten().map(|o| o.size).sum();

        if groups.is_empty() {
            info!(
                "No objects under {}; batch {} is complete",
                request.src_path, execution_id
            );
            let done = self
                .tracker
                .complete(
                    execution_id,
                    ROOT_TASK_ID,
                    TaskStatus::Succeeded,
                    json!({ TOTAL_SUB_TASK: 0, "objects": 0 }),
                )
                .await?;
            return Ok(ScanOutcome {
                execution_id: execution_id.to_string(),
                root_task_id: ROOT_TASK_ID.to_string(),
                status: done.transition.entry().status,
                objects: 0,
                bytes: 0,
                task_ids: Vec::new(),
            });
        }

        let _ = ledger
            .update_data(
                execution_id,
                ROOT_TASK_ID,
                json!({ TOTAL_SUB_TASK: groups.len(), "objects": objects, "bytes": bytes }),
            )
            .await?;
        info!(
            "Batch {}: {} objects ({}) in {} tasks",
            execution_id,
            objects,
            format_size(bytes),
            groups.len()
        );

        let mut requests = Vec::with_capacity(groups.len());
        for (index, group) in groups.into_iter().enumerate() {
            let group_bytes: u64 = group.iter().map(|o| o.size).sum();
            let migration = self.build_request(request, format!("group-{index:05}"), group);
            let entry = TaskLogEntry::running(
                execution_id,
                migration.task_id.as_str(),
                Some(ROOT_TASK_ID.to_string()),
                self.worker_function.as_str(),
                json!({ "objects": migration.data.len(), "bytes": group_bytes }),
            );
            if let Err(e) = ledger.create(&entry).await {
                let e = Error::from(e);
                self.fail_root(execution_id, &e).await?;
                return Err(e);
            }
            requests.push(migration);
        }

        for (index, migration) in requests.iter().enumerate() {
            if let Err(e) = self.dispatcher.dispatch(migration).await {
                error!(
                    "Dispatch of task {} failed; {} tasks will not run: {}",
                    migration.task_id,
                    requests.len() - index,
                    e
                );
                for undelivered in &requests[index..] {
                    let _ = self
                        .tracker
                        .complete(
                            execution_id,
                            &undelivered.task_id,
                            TaskStatus::Failed,
                            json!({ ERROR: format!("not dispatched: {e}") }),
                        )
                        .await?;
                }
                return Err(e);
            }
        }

        let root = ledger.get(execution_id, ROOT_TASK_ID).await?;
        Ok(ScanOutcome {
            execution_id: execution_id.to_string(),
            root_task_id: ROOT_TASK_ID.to_string(),
            status: root.status,
            objects,
            bytes,
            task_ids: requests.into_iter().map(|r| r.task_id).collect(),
        })
    }

    /// List, rewrite and group; no ledger or queue side effects
    pub async fn plan(&self, request: &ScanRequest) -> Result<Vec<Vec<PlannedObject>>> {
        let src = &request.src_path;
        let store = self.stores.get(&src.location)?;
        let _ = self.stores.get(&request.dst_path.location)?;

        let prefix = (!src.prefix.as_ref().is_empty()).then_some(&src.prefix);
        let mut listed: Vec<ObjectMeta> = store
            .list(prefix)
            .try_collect()
            .await
            .map_err(|e| Error::object_io(&src.location, src.prefix.as_ref(), e))?;
        listed.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
        debug!("Listed {} objects under {}", listed.len(), src);

        let mut planned = Vec::with_capacity(listed.len());
        for (index, meta) in listed.iter().enumerate() {
            if is_directory_marker(meta, listed.get(index + 1))
                || is_stripped_placeholder(store.as_ref(), &src.location, meta).await?
            {
                debug!("Skipping directory marker {}", meta.location);
                continue;
            }
            let Some(parts) = meta.location.prefix_match(&src.prefix) else {
                continue;
            };
            let relative: Vec<String> = parts.map(|p| p.as_ref().to_string()).collect();
            if relative.is_empty() {
                continue;
            }
            let segments = request.keep_prefix.apply(&relative)?;
            planned.push(PlannedObject {
                source: meta.location.clone(),
                size: meta.size,
                destination: request.dst_path.join(&segments)?,
            });
        }

        let mut groups = group_objects(
            planned,
            request.max_objects_per_task,
            request.group_byte_limit(),
        );
        if request.merge {
            assign_merge_destinations(&mut groups, &request.execution_id)?;
        } else {
            check_destinations(&groups)?;
        }
        Ok(groups)
    }

    fn build_request(
        &self,
        request: &ScanRequest,
        task_id: String,
        group: Vec<PlannedObject>,
    ) -> MigrationRequest {
        let data = group
            .into_iter()
            .map(|object| ObjectPair {
                source: ObjectRef {
                    location: request.src_path.location.clone(),
                    key: object.source.to_string(),
                },
                destination: ObjectRef {
                    location: request.dst_path.location.clone(),
                    key: object.destination.to_string(),
                },
            })
            .collect();
        MigrationRequest {
            execution_id: request.execution_id.clone(),
            task_id,
            parent_task_id: ROOT_TASK_ID.to_string(),
            source_type: request.src_path.source_type().to_string(),
            data,
            delete_on_success: request.delete_on_success,
            merge: request.merge,
            enrichment_plugins: request.enrichment_plugins.clone(),
            task_token: None,
        }
    }

    async fn fail_root(&self, execution_id: &str, cause: &Error) -> Result<()> {
        error!("Scan of batch {} failed: {}", execution_id, cause);
        let _ = self
            .tracker
            .complete(
                execution_id,
                ROOT_TASK_ID,
                TaskStatus::Failed,
                json!({ ERROR: cause.to_string() }),
            )
            .await?;
        Ok(())
    }
}

fn is_directory_marker(meta: &ObjectMeta, next: Option<&ObjectMeta>) -> bool {
    if meta.size != 0 {
        return false;
    }
    let key = meta.location.as_ref();
    key.ends_with(FOLDER_MARKER_SUFFIX)
        || next.is_some_and(|n| {
            n.location
                .as_ref()
                .strip_prefix(key)
                .is_some_and(|rest| rest.starts_with('/'))
        })
}

/// A zero-byte `dir/` placeholder lists as `dir` because listing drops the
/// trailing slash. Only such a stripped key fails to resolve again.
async fn is_stripped_placeholder(
    store: &dyn ObjectStore,
    location: &str,
    meta: &ObjectMeta,
) -> Result<bool> {
    if meta.size != 0 {
        return Ok(false);
    }
    match store.head(&meta.location).await {
        Ok(_) => Ok(false),
        Err(object_store::Error::NotFound { .. }) => Ok(true),
        Err(e) => Err(Error::object_io(location, meta.location.as_ref(), e)),
    }
}

/// Greedy grouping in listing order.
///
/// A group closes when the next object would exceed either limit. An object
/// larger than `max_bytes` still gets a group of its own.
pub fn group_objects(
    objects: Vec<PlannedObject>,
    max_objects: usize,
    max_bytes: Option<u64>,
) -> Vec<Vec<PlannedObject>> {
    let max_objects = max_objects.max(1);
    let mut groups = Vec::new();
    let mut current: Vec<PlannedObject> = Vec::new();
    let mut current_bytes = 0u64;
    for object in objects {
        let over_count = current.len() >= max_objects;
        let over_bytes =
            max_bytes.is_some_and(|max| current_bytes.saturating_add(object.size) > max);
        if !current.is_empty() && (over_count || over_bytes) {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(object.size);
        current.push(object);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Point every object of a group that shares a directory and extension at
/// one `part-<tag>-<group>` destination
fn assign_merge_destinations(groups: &mut [Vec<PlannedObject>], execution_id: &str) -> Result<()> {
    let mut tag: String = execution_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(12)
        .collect();
    if tag.is_empty() {
        tag = "batch".to_string();
    }
    for (index, group) in groups.iter_mut().enumerate() {
        for object in group.iter_mut() {
            object.destination = merged_destination(&object.destination, &tag, index)?;
        }
    }
    Ok(())
}

fn merged_destination(destination: &Path, tag: &str, group: usize) -> Result<Path> {
    let key = destination.as_ref();
    let (dir, file_name) = match key.rsplit_once('/') {
        Some((dir, file_name)) => (Some(dir), file_name),
        None => (None, key),
    };
    let name = format!("part-{tag}-{group:05}{}", extension(file_name));
    let merged = match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name,
    };
    Path::parse(&merged).map_err(|e| Error::rewrite(key, e.to_string()))
}

/// `.csv.gz` for `x.csv.gz`; empty without an extension
fn extension(file_name: &str) -> &str {
    match file_name.char_indices().skip(1).find(|(_, c)| *c == '.') {
        Some((index, _)) => &file_name[index..],
        None => "",
    }
}

fn check_destinations(groups: &[Vec<PlannedObject>]) -> Result<()> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for object in groups.iter().flatten() {
        if let Some(first) = seen.insert(object.destination.as_ref(), object.source.as_ref()) {
            return Err(Error::DestinationConflict {
                destination: object.destination.to_string(),
                first: first.to_string(),
                second: object.source.to_string(),
            });
        }
    }
    Ok(())
}
