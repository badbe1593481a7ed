use super::{MergeStrategy, has_extension};
use crate::error::{Error, Result};
use bytes::Bytes;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

/// Decompress every member, concatenate, recompress once
pub struct GzipMerge {
    level: Compression,
}

impl Default for GzipMerge {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipMerge {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl MergeStrategy for GzipMerge {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn can_handle(&self, key: &str) -> bool {
        has_extension(key, &["gz", "gzip"])
    }

    fn merge(&self, destination: &str, parts: &[Bytes]) -> Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        let mut buf = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            buf.clear();
            let _ = MultiGzDecoder::new(part.as_ref())
                .read_to_end(&mut buf)
                .map_err(|e| {
                    Error::format_mismatch(destination, format!("source {index} is not gzip: {e}"))
                })?;
            encoder.write_all(&buf)?;
        }
        Ok(Bytes::from(encoder.finish()?))
    }
}
