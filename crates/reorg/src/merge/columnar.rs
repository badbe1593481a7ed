//! Parquet merge: row groups of every source appended in order
//!
//! Sources must share one schema. Any structural divergence, nullability and
//! field metadata included, is rejected rather than reconciled.

use super::{MergeStrategy, has_extension};
use crate::error::{Error, Result};
use arrow_schema::SchemaRef;
use bytes::Bytes;
use log::debug;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;

#[derive(Default)]
pub struct ParquetMerge {
    properties: Option<WriterProperties>,
}

impl ParquetMerge {
    pub fn with_properties(properties: WriterProperties) -> Self {
        Self {
            properties: Some(properties),
        }
    }
}

impl MergeStrategy for ParquetMerge {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn can_handle(&self, key: &str) -> bool {
        has_extension(key, &["parquet"])
    }

    fn merge(&self, destination: &str, parts: &[Bytes]) -> Result<Bytes> {
        let mut schema: Option<SchemaRef> = None;
        let mut row_groups = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let builder = ParquetRecordBatchReaderBuilder::try_new(part.clone())?;
            let source_schema = builder.schema().clone();
            match &schema {
                None => schema = Some(source_schema),
                Some(expected) if expected.fields() != source_schema.fields() => {
                    return Err(Error::format_mismatch(
                        destination,
                        format!(
                            "source {index} schema {:?} differs from {:?}",
                            source_schema.fields(),
                            expected.fields()
                        ),
                    ));
                }
                Some(_) => {}
            }
            row_groups.push(builder.metadata().num_row_groups());
        }
        let Some(schema) = schema else {
            return Err(Error::format_mismatch(destination, "no parquet sources"));
        };

        let mut writer = ArrowWriter::try_new(Vec::new(), schema, self.properties.clone())?;
        for (part, count) in parts.iter().zip(row_groups) {
            for row_group in 0..count {
                let reader = ParquetRecordBatchReaderBuilder::try_new(part.clone())?
                    .with_row_groups(vec![row_group])
                    .build()?;
                for batch in reader {
                    writer.write(&batch?)?;
                }
                // One source row group becomes one destination row group
                writer.flush()?;
            }
        }
        let merged = writer.into_inner()?;
        debug!(
            "Merged {} parquet sources into {} ({} bytes)",
            parts.len(),
            destination,
            merged.len()
        );
        Ok(Bytes::from(merged))
    }
}
