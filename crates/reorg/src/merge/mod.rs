//! Format-aware merging
//!
//! Each strategy claims keys by extension and turns the ordered source
//! payloads of one destination into that destination's bytes. The worker
//! only asks the registry for a strategy; adding a container format means
//! registering another strategy.

mod columnar;
mod gzip;
mod text;

pub use columnar::ParquetMerge;
pub use gzip::GzipMerge;
pub use text::Concat;

use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;

pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, key: &str) -> bool;

    /// Combine `parts` in order into one object destined for `destination`
    fn merge(&self, destination: &str, parts: &[Bytes]) -> Result<Bytes>;
}

pub struct MergeRegistry {
    strategies: Vec<Arc<dyn MergeStrategy>>,
    fallback: Arc<dyn MergeStrategy>,
}

impl MergeRegistry {
    /// Registry with no format strategies; everything falls back to `fallback`
    pub fn empty(fallback: Arc<dyn MergeStrategy>) -> Self {
        Self {
            strategies: Vec::new(),
            fallback,
        }
    }

    /// Register a strategy ahead of those already present
    pub fn register(&mut self, strategy: Arc<dyn MergeStrategy>) {
        self.strategies.insert(0, strategy);
    }

    pub fn strategy_for(&self, key: &str) -> &dyn MergeStrategy {
        self.strategies
            .iter()
            .find(|s| s.can_handle(key))
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

impl Default for MergeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty(Arc::new(Concat::raw()));
        registry.register(Arc::new(Concat::delimited_text()));
        registry.register(Arc::new(GzipMerge::default()));
        registry.register(Arc::new(ParquetMerge::default()));
        registry
    }
}

/// Case-insensitive `.ext` suffix test
pub(crate) fn has_extension(key: &str, extensions: &[&str]) -> bool {
    let key = key.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| key.ends_with(&format!(".{ext}")))
}
