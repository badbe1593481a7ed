use super::{MergeStrategy, has_extension};
use crate::error::Result;
use bytes::{Bytes, BytesMut};

const TEXT_EXTENSIONS: &[&str] = &["csv", "tsv", "txt", "log", "json", "jsonl", "ndjson"];

/// Byte-for-byte concatenation in group order
pub struct Concat {
    name: &'static str,
    extensions: &'static [&'static str],
}

impl Concat {
    /// Delimited text formats
    pub fn delimited_text() -> Self {
        Self {
            name: "delimited-text",
            extensions: TEXT_EXTENSIONS,
        }
    }

    /// Fallback for unrecognized extensions
    pub fn raw() -> Self {
        Self {
            name: "raw",
            extensions: &[],
        }
    }
}

impl MergeStrategy for Concat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, key: &str) -> bool {
        has_extension(key, self.extensions)
    }

    fn merge(&self, _destination: &str, parts: &[Bytes]) -> Result<Bytes> {
        let total = parts.iter().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for part in parts {
            out.extend_from_slice(part);
        }
        Ok(out.freeze())
    }
}
