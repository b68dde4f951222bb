//! Columnar array store
//!
//! Each source becomes one group directory holding `data.parquet` (a
//! `timestamp` column plus an optional `payload` column) and `meta.json`.
//! Files are written to a temporary name first and renamed into place, so a
//! group is either complete or absent.

use super::bundle::{SessionLayout, GROUP_DATA_FILE, GROUP_META_FILE};
use super::schema::GroupMeta;
use crate::capture::{Payload, SourceKind};
use crate::recorder::buffer::{PayloadShape, SealedBuffer};
use arrow::array::{Array, ArrayRef, Float64Array, ListArray, RecordBatch};
use arrow::datatypes::{DataType, Float64Type};
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const PAYLOAD_COLUMN: &str = "payload";

/// Errors raised while writing or reading the array store
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid group {0}: {1}")]
    InvalidGroup(String, String),
}

impl PersistenceError {
    fn invalid(path: &Path, message: impl Into<String>) -> Self {
        PersistenceError::InvalidGroup(path.display().to_string(), message.into())
    }
}

/// Numeric payload column of a group
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadColumn {
    /// Cameras and empty groups carry no payload
    None,
    Scalar(Vec<f64>),
    Vector { width: usize, rows: Vec<Vec<f64>> },
}

impl PayloadColumn {
    fn from_payloads<'a>(
        payloads: impl Iterator<Item = &'a Payload>,
        shape: PayloadShape,
    ) -> Result<Self, String> {
        match shape {
            PayloadShape::Scalar => payloads
                .map(|p| match p {
                    Payload::Scalar(v) => Ok(*v),
                    other => Err(format!("expected scalar, got {}", other.type_name())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(PayloadColumn::Scalar),
            PayloadShape::Vector(width) => payloads
                .map(|p| match p {
                    Payload::Vector(v) if v.len() == width => Ok(v.clone()),
                    Payload::Vector(v) => Err(format!("ragged row: {} != {}", v.len(), width)),
                    other => Err(format!("expected vector, got {}", other.type_name())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|rows| PayloadColumn::Vector { width, rows }),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PayloadColumn::None => 0,
            PayloadColumn::Scalar(values) => values.len(),
            PayloadColumn::Vector { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arrow array for the first `rows` entries, `None` for payload-less groups
    pub fn to_array(&self, rows: usize) -> Option<ArrayRef> {
        match self {
            PayloadColumn::None => None,
            PayloadColumn::Scalar(values) => {
                let n = rows.min(values.len());
                Some(Arc::new(Float64Array::from(values[..n].to_vec())) as ArrayRef)
            }
            PayloadColumn::Vector { rows: data, .. } => {
                let n = rows.min(data.len());
                let list = ListArray::from_iter_primitive::<Float64Type, _, _>(
                    data[..n]
                        .iter()
                        .map(|row| Some(row.iter().copied().map(Some))),
                );
                Some(Arc::new(list) as ArrayRef)
            }
        }
    }
}

/// A group read back from the store
#[derive(Debug, Clone)]
pub struct StoredGroup {
    pub meta: GroupMeta,
    /// Seconds since session start
    pub timestamps: Vec<f64>,
    pub payload: PayloadColumn,
}

impl StoredGroup {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn writer_properties() -> Result<WriterProperties, PersistenceError> {
    Ok(WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
        .build())
}

/// Write a batch to `path` through a temporary file
pub(crate) fn write_batch(batch: &RecordBatch, path: &Path) -> Result<(), PersistenceError> {
    let tmp = tmp_path(path);
    let result = (|| -> Result<(), PersistenceError> {
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()?))?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<(), PersistenceError> {
    let tmp = tmp_path(path);
    let result = (|| -> Result<(), PersistenceError> {
        fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn timestamp_array(timestamps: &[f64]) -> ArrayRef {
    Arc::new(Float64Array::from(timestamps.to_vec()))
}

/// Persist one sealed buffer as a store group.
///
/// A group with zero samples gets `meta.json` only. On failure nothing of the
/// group is left behind.
pub fn write_group(
    layout: &SessionLayout,
    name: &str,
    kind: SourceKind,
    nominal_frequency: f64,
    sealed: &SealedBuffer,
) -> Result<GroupMeta, PersistenceError> {
    let dir = layout.group_dir(name);
    let data_path = dir.join(GROUP_DATA_FILE);
    let meta_path = dir.join(GROUP_META_FILE);

    let timestamps: Vec<f64> = sealed
        .timestamps()
        .iter()
        .map(|t| t.as_secs_f64())
        .collect();

    let (payload, shape) = match sealed {
        SealedBuffer::Samples {
            samples,
            shape: Some(shape),
        } => {
            let column = PayloadColumn::from_payloads(samples.iter().map(|s| &s.payload), *shape)
                .map_err(|e| PersistenceError::invalid(&dir, e))?;
            (column, shape.dims())
        }
        _ => (PayloadColumn::None, Vec::new()),
    };

    let meta = GroupMeta {
        name: name.to_string(),
        kind,
        nominal_frequency,
        sample_count: timestamps.len(),
        shape,
        has_payload: !matches!(payload, PayloadColumn::None),
    };

    let result = (|| -> Result<(), PersistenceError> {
        fs::create_dir_all(&dir)?;
        if !timestamps.is_empty() {
            let mut columns = vec![(TIMESTAMP_COLUMN, timestamp_array(&timestamps))];
            if let Some(array) = payload.to_array(timestamps.len()) {
                columns.push((PAYLOAD_COLUMN, array));
            }
            let batch = RecordBatch::try_from_iter(columns)?;
            write_batch(&batch, &data_path)?;
        }
        write_json(&meta, &meta_path)
    })();

    if let Err(e) = result {
        tracing::error!("Failed to persist group '{}': {}", name, e);
        let _ = fs::remove_dir_all(&dir);
        return Err(e);
    }

    tracing::debug!(
        "Persisted group '{}' ({} samples, shape {:?})",
        name,
        meta.sample_count,
        meta.shape
    );
    Ok(meta)
}

/// Read a group's metadata without touching its arrays
pub fn read_group_meta(group_dir: &Path) -> Result<GroupMeta, PersistenceError> {
    let content = fs::read_to_string(group_dir.join(GROUP_META_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

/// Read one group back from the store
pub fn read_group(group_dir: &Path) -> Result<StoredGroup, PersistenceError> {
    let meta = read_group_meta(group_dir)?;
    let data_path = group_dir.join(GROUP_DATA_FILE);

    let mut timestamps = Vec::with_capacity(meta.sample_count);
    let mut scalars = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();

    if meta.sample_count > 0 {
        let file = File::open(&data_path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        for batch in reader {
            let batch = batch?;
            let ts = batch
                .column_by_name(TIMESTAMP_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .ok_or_else(|| PersistenceError::invalid(&data_path, "missing timestamp column"))?;
            timestamps.extend(ts.values().iter().copied());

            if !meta.has_payload {
                continue;
            }
            let column = batch
                .column_by_name(PAYLOAD_COLUMN)
                .ok_or_else(|| PersistenceError::invalid(&data_path, "missing payload column"))?;

            match column.data_type() {
                DataType::Float64 => {
                    let values = column
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .ok_or_else(|| PersistenceError::invalid(&data_path, "bad scalar column"))?;
                    scalars.extend(values.values().iter().copied());
                }
                DataType::List(_) => {
                    let list = column
                        .as_any()
                        .downcast_ref::<ListArray>()
                        .ok_or_else(|| PersistenceError::invalid(&data_path, "bad list column"))?;
                    for i in 0..list.len() {
                        let row = list.value(i);
                        let values = row
                            .as_any()
                            .downcast_ref::<Float64Array>()
                            .ok_or_else(|| {
                                PersistenceError::invalid(&data_path, "list values are not f64")
                            })?;
                        rows.push(values.values().to_vec());
                    }
                }
                other => {
                    return Err(PersistenceError::invalid(
                        &data_path,
                        format!("unsupported payload type {}", other),
                    ))
                }
            }
        }
    }

    if timestamps.len() != meta.sample_count {
        return Err(PersistenceError::invalid(
            group_dir,
            format!(
                "meta says {} samples, data has {}",
                meta.sample_count,
                timestamps.len()
            ),
        ));
    }

    let payload = if !meta.has_payload {
        PayloadColumn::None
    } else if meta.shape.is_empty() {
        PayloadColumn::Scalar(scalars)
    } else {
        PayloadColumn::Vector {
            width: meta.shape[0],
            rows,
        }
    };

    if meta.has_payload && payload.len() != timestamps.len() {
        return Err(PersistenceError::invalid(
            group_dir,
            "payload and timestamp lengths differ",
        ));
    }

    Ok(StoredGroup {
        meta,
        timestamps,
        payload,
    })
}
