//! Archive object reorganizer
//!
//! Relocates objects between prefixes and stores, optionally merging them and
//! deleting the sources, while rewriting their partition paths.
//!
//! Pipeline: [`Scanner`] lists the source, computes destination keys, and
//! splits the listing into bounded groups, each recorded in the task ledger
//! and sent to a [`Dispatcher`]. Every [`MigrationWorker`] moves one group,
//! writes its own terminal row, and runs the ledger's completion protocol,
//! so the last worker to finish closes the batch and signals the
//! orchestrator.

pub mod error;
pub mod location;
pub mod merge;
pub mod params;
pub mod queue;
pub mod rewrite;
pub mod scanner;
pub mod size;
pub mod worker;

pub use error::{Error, ParameterError, Result};
pub use location::{ObjectStores, ObjectUri, StoreConfig, build_object_store};
pub use merge::{MergeRegistry, MergeStrategy};
pub use params::{MigrationRequest, ObjectPair, ObjectRef, ScanRequest};
pub use queue::{ChannelQueue, Dispatcher, QueueReceiver};
pub use rewrite::{PathRewriteRule, SegmentRule};
pub use scanner::{ROOT_TASK_ID, ScanOutcome, Scanner};
pub use size::{format_size, parse_size};
pub use worker::{MigrationOutcome, MigrationWorker};
