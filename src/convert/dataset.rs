//! Training-dataset conversion
//!
//! Turns a saved session into a LeRobot-style episode:
//! - data/episode_NNNNNN.parquet: one row per aligned frame
//! - videos/observation.images.<source>/episode_NNNNNN.mp4: copied camera videos
//! - meta/info.json: features and provenance
//! - meta/tasks.jsonl: task labels
//!
//! Sources are aligned by ordinal index and truncated to the shortest one.
//! The session directory is only read. Output contains no wall-clock values,
//! so converting the same session twice produces identical files.

use crate::capture::SourceKind;
use crate::recorder::state::SessionState;
use crate::store::writer::{write_batch, PayloadColumn, StoredGroup};
use crate::store::{read_group, read_metadata, BundleError, PersistenceError, SessionLayout};
use arrow::array::{ArrayRef, Float32Array, Float64Array, Int64Array, ListArray, RecordBatch};
use arrow::datatypes::Float32Type;
use arrow::error::ArrowError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DATASET_FORMAT: &str = "lerobot";
pub const CODEBASE_VERSION: &str = "v2.0";

/// Errors that abort a conversion. The session is never modified.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Task label must not be empty")]
    EmptyTask,

    #[error("Session is {0:?}, only saved sessions can be converted")]
    NotSaved(SessionState),

    #[error("Session metadata: {0}")]
    Metadata(#[from] BundleError),

    #[error("Session has no source with samples")]
    EmptySession,

    #[error("Missing video for camera '{name}' at {path:?}")]
    MissingVideo { name: String, path: PathBuf },

    #[error("Unreadable group '{name}': {error}")]
    Group {
        name: String,
        #[source]
        error: PersistenceError,
    },

    #[error("Output directory {0:?} is inside the session")]
    OutputInsideSession(PathBuf),

    #[error("Failed to write dataset: {0}")]
    Write(#[from] PersistenceError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Conversion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    /// Natural-language label of the demonstrated task
    pub task: String,
    #[serde(default)]
    pub episode_index: u64,
}

impl ConvertOptions {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            episode_index: 0,
        }
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new("robot_manipulation")
    }
}

/// What a conversion produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub output_dir: PathBuf,
    /// Aligned frame count
    pub frames: usize,
    /// Sources included, in column order
    pub sources: Vec<String>,
    /// Sources left out because they have no samples
    pub skipped: Vec<String>,
    /// Source providing the `timestamp` column
    pub reference_source: String,
}

struct Included {
    name: String,
    group: StoredGroup,
    video: Option<PathBuf>,
}

fn column_name(name: &str, kind: SourceKind) -> String {
    match kind {
        SourceKind::Sensor => format!("observation.state.{}", name),
        SourceKind::Controller => format!("action.{}", name),
        SourceKind::Camera => format!("observation.images.{}", name),
    }
}

fn episode_file(episode_index: u64, extension: &str) -> String {
    format!("episode_{:06}.{}", episode_index, extension)
}

fn float_column(payload: &PayloadColumn, rows: usize) -> Option<ArrayRef> {
    match payload {
        PayloadColumn::None => None,
        PayloadColumn::Scalar(values) => {
            let values: Vec<f32> = values.iter().take(rows).map(|v| *v as f32).collect();
            Some(Arc::new(Float32Array::from(values)) as ArrayRef)
        }
        PayloadColumn::Vector { rows: data, .. } => {
            let list = ListArray::from_iter_primitive::<Float32Type, _, _>(
                data.iter()
                    .take(rows)
                    .map(|row| Some(row.iter().map(|v| Some(*v as f32)))),
            );
            Some(Arc::new(list) as ArrayRef)
        }
    }
}

fn feature(included: &Included, fps: u32) -> Value {
    match included.group.meta.kind {
        SourceKind::Camera => json!({
            "dtype": "video",
            "shape": [1],
            "video_fps": fps,
        }),
        _ => {
            let shape = if included.group.meta.shape.is_empty() {
                vec![1]
            } else {
                included.group.meta.shape.clone()
            };
            json!({
                "dtype": "float32",
                "shape": shape,
                "nominal_frequency": included.group.meta.nominal_frequency,
            })
        }
    }
}

/// Absolute form of a path that may not exist yet.
///
/// The nearest existing ancestor is canonicalized and the missing tail is
/// appended unchanged.
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Convert a saved session into a single-episode dataset under `output_dir`
pub fn convert_session(
    session_dir: &Path,
    output_dir: &Path,
    options: &ConvertOptions,
) -> Result<ConversionSummary, ConversionError> {
    let task = options.task.trim();
    if task.is_empty() {
        return Err(ConversionError::EmptyTask);
    }

    let metadata = read_metadata(session_dir)?;
    if metadata.status != SessionState::Saved {
        return Err(ConversionError::NotSaved(metadata.status));
    }
    if resolve(output_dir)?.starts_with(fs::canonicalize(session_dir)?) {
        return Err(ConversionError::OutputInsideSession(output_dir.to_path_buf()));
    }

    let layout = SessionLayout::new(session_dir);
    let extension = metadata.video.codec.extension();

    let mut included = Vec::new();
    let mut skipped = Vec::new();

    // BTreeMap iteration keeps column order stable
    for (name, entry) in &metadata.sources {
        if entry.sample_count == 0 {
            skipped.push(name.clone());
            continue;
        }

        let group = read_group(&layout.group_dir(name)).map_err(|error| ConversionError::Group {
            name: name.clone(),
            error,
        })?;
        if group.is_empty() {
            skipped.push(name.clone());
            continue;
        }

        let video = if entry.kind.is_image() {
            // A failed encode leaves no `video` entry even if a file is present
            let path = layout.video_path(name, extension);
            if entry.video.is_none() || !path.is_file() {
                return Err(ConversionError::MissingVideo {
                    name: name.clone(),
                    path,
                });
            }
            Some(path)
        } else {
            if matches!(group.payload, PayloadColumn::None) {
                return Err(ConversionError::Group {
                    name: name.clone(),
                    error: PersistenceError::InvalidGroup(name.clone(), "no payload column".to_string()),
                });
            }
            None
        };

        included.push(Included {
            name: name.clone(),
            group,
            video,
        });
    }

    if included.is_empty() {
        return Err(ConversionError::EmptySession);
    }

    let frames = included.iter().map(|s| s.group.len()).min().unwrap_or(0);
    let reference = included
        .iter()
        .find(|s| !s.group.meta.kind.is_image())
        .unwrap_or(&included[0]);
    let reference_source = reference.name.clone();

    tracing::info!(
        "Converting session {} ({} sources, {} aligned frames, reference '{}')",
        metadata.session_id,
        included.len(),
        frames,
        reference_source
    );
    for source in &included {
        if source.group.len() > frames {
            tracing::debug!(
                "Truncating '{}' from {} to {} samples",
                source.name,
                source.group.len(),
                frames
            );
        }
    }

    // Tabular episode
    let episode = options.episode_index as i64;
    let ordinals: Vec<i64> = (0..frames as i64).collect();
    let mut columns: Vec<(String, ArrayRef)> = vec![
        ("frame_index".to_string(), Arc::new(Int64Array::from(ordinals.clone())) as ArrayRef),
        ("episode_index".to_string(), Arc::new(Int64Array::from(vec![episode; frames])) as ArrayRef),
        ("task_index".to_string(), Arc::new(Int64Array::from(vec![0i64; frames])) as ArrayRef),
        (
            "timestamp".to_string(),
            Arc::new(Float64Array::from(reference.group.timestamps[..frames].to_vec())) as ArrayRef,
        ),
    ];

    let mut features = BTreeMap::new();
    for key in ["frame_index", "episode_index", "task_index"] {
        features.insert(key.to_string(), json!({ "dtype": "int64", "shape": [1] }));
    }
    features.insert("timestamp".to_string(), json!({ "dtype": "float64", "shape": [1] }));

    for source in &included {
        let column = column_name(&source.name, source.group.meta.kind);
        let array = match source.group.meta.kind {
            SourceKind::Camera => Arc::new(Int64Array::from(ordinals.clone())) as ArrayRef,
            _ => float_column(&source.group.payload, frames).ok_or_else(|| ConversionError::Group {
                name: source.name.clone(),
                error: PersistenceError::InvalidGroup(source.name.clone(), "no payload column".to_string()),
            })?,
        };
        features.insert(column.clone(), feature(source, metadata.video.fps));
        columns.push((column, array));
    }

    let batch = RecordBatch::try_from_iter(columns)?;

    let data_dir = output_dir.join("data");
    let meta_dir = output_dir.join("meta");
    fs::create_dir_all(&data_dir)?;
    fs::create_dir_all(&meta_dir)?;
    write_batch(&batch, &data_dir.join(episode_file(options.episode_index, "parquet")))?;

    // Videos
    for source in &included {
        if let Some(video) = &source.video {
            let dir = output_dir
                .join("videos")
                .join(column_name(&source.name, SourceKind::Camera));
            fs::create_dir_all(&dir)?;
            fs::copy(video, dir.join(episode_file(options.episode_index, extension)))?;
        }
    }

    // Metadata
    let reference_fps = if reference.group.meta.kind.is_image() {
        metadata.video.fps as f64
    } else {
        reference.group.meta.nominal_frequency
    };
    let info = json!({
        "codebase_version": CODEBASE_VERSION,
        "format": DATASET_FORMAT,
        "task": task,
        "episode_index": options.episode_index,
        "total_episodes": 1,
        "total_frames": frames,
        "total_tasks": 1,
        "fps": reference_fps,
        "data_path": "data/episode_{episode_index:06d}.parquet",
        "video_path": format!("videos/{{video_key}}/episode_{{episode_index:06d}}.{}", extension),
        "reference_source": reference_source,
        "features": features,
        "source_session": metadata.session_id,
        "skipped_sources": &skipped,
    });
    fs::write(meta_dir.join("info.json"), serde_json::to_string_pretty(&info)?)?;

    let task_line = serde_json::to_string(&json!({ "task_index": 0, "task": task }))?;
    fs::write(meta_dir.join("tasks.jsonl"), format!("{}\n", task_line))?;

    tracing::info!("Dataset written to {:?} ({} frames)", output_dir, frames);

    Ok(ConversionSummary {
        output_dir: output_dir.to_path_buf(),
        frames,
        sources: included.into_iter().map(|s| s.name).collect(),
        skipped,
        reference_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Payload;
    use crate::export::{EncodedStream, VideoConfig};
    use crate::recorder::buffer::{SealedBuffer, SourceBuffer};
    use crate::store::{write_group, write_metadata, SessionMetadata, SourceEntry, VideoParams, SESSION_VERSION};
    use arrow::array::Array;
    use chrono::{TimeZone, Utc};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::time::Duration;
    use tempfile::tempdir;

    fn numeric(name: &str, kind: SourceKind, n: u64, width: usize) -> SealedBuffer {
        let mut buffer = SourceBuffer::new(name, kind, PathBuf::new());
        for i in 0..n {
            let payload = if width == 0 {
                Payload::Scalar(i as f64)
            } else {
                Payload::Vector(vec![i as f64; width])
            };
            buffer.push(Duration::from_millis(i * 10 + 1), payload).unwrap();
        }
        buffer.seal()
    }

    fn save_session(dir: &Path, groups: Vec<(&str, SourceKind, SealedBuffer)>, status: SessionState) {
        save_session_with_videos(dir, groups, status, &[]);
    }

    fn save_session_with_videos(
        dir: &Path,
        groups: Vec<(&str, SourceKind, SealedBuffer)>,
        status: SessionState,
        encoded: &[&str],
    ) {
        let layout = SessionLayout::new(dir);
        let mut sources = BTreeMap::new();
        for (name, kind, sealed) in groups {
            let meta = write_group(&layout, name, kind, 100.0, &sealed).unwrap();
            let video = encoded.contains(&name).then(|| EncodedStream {
                source: name.to_string(),
                path: layout.video_path(name, "mp4"),
                frame_count: meta.sample_count as u64,
                duration_secs: meta.sample_count as f64 / 30.0,
            });
            sources.insert(
                name.to_string(),
                SourceEntry {
                    kind,
                    nominal_frequency: 100.0,
                    enabled: true,
                    sample_count: meta.sample_count,
                    failed_polls: 0,
                    group: SessionLayout::group_relative(name),
                    video,
                    errors: Vec::new(),
                },
            );
        }
        let started_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let metadata = SessionMetadata {
            version: SESSION_VERSION,
            session_id: "test-session".to_string(),
            status,
            started_at,
            started_at_unix_ms: started_at.timestamp_millis(),
            duration_secs: 1.0,
            sources,
            video: VideoParams::from(&VideoConfig::default()),
        };
        write_metadata(&metadata, dir).unwrap();
    }

    fn read_episode(out: &Path) -> RecordBatch {
        let file = fs::File::open(out.join("data").join("episode_000000.parquet")).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        reader.next().unwrap().unwrap()
    }

    #[test]
    fn test_aligns_to_shortest_source() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        save_session(
            session.path(),
            vec![
                ("a", SourceKind::Sensor, numeric("a", SourceKind::Sensor, 5, 3)),
                ("b", SourceKind::Controller, numeric("b", SourceKind::Controller, 7, 0)),
            ],
            SessionState::Saved,
        );

        let summary = convert_session(session.path(), out.path(), &ConvertOptions::new("pick cube")).unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.reference_source, "a");

        let batch = read_episode(out.path());
        assert_eq!(batch.num_rows(), 5);
        assert!(batch.column_by_name("observation.state.a").is_some());
        let action = batch.column_by_name("action.b").unwrap();
        assert_eq!(action.len(), 5);

        let tasks = fs::read_to_string(out.path().join("meta").join("tasks.jsonl")).unwrap();
        assert_eq!(tasks, "{\"task_index\":0,\"task\":\"pick cube\"}\n");
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let session = tempdir().unwrap();
        let out1 = tempdir().unwrap();
        let out2 = tempdir().unwrap();
        save_session(
            session.path(),
            vec![("joint_pos", SourceKind::Sensor, numeric("joint_pos", SourceKind::Sensor, 4, 2))],
            SessionState::Saved,
        );

        let options = ConvertOptions::default();
        convert_session(session.path(), out1.path(), &options).unwrap();
        convert_session(session.path(), out2.path(), &options).unwrap();

        for rel in ["data/episode_000000.parquet", "meta/info.json", "meta/tasks.jsonl"] {
            assert_eq!(
                fs::read(out1.path().join(rel)).unwrap(),
                fs::read(out2.path().join(rel)).unwrap(),
                "{} differs",
                rel
            );
        }
    }

    #[test]
    fn test_zero_sample_sources_are_skipped() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        save_session(
            session.path(),
            vec![
                ("dead", SourceKind::Sensor, numeric("dead", SourceKind::Sensor, 0, 0)),
                ("live", SourceKind::Sensor, numeric("live", SourceKind::Sensor, 3, 0)),
            ],
            SessionState::Saved,
        );

        let summary = convert_session(session.path(), out.path(), &ConvertOptions::default()).unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.skipped, vec!["dead".to_string()]);

        let info: Value =
            serde_json::from_str(&fs::read_to_string(out.path().join("meta").join("info.json")).unwrap())
                .unwrap();
        assert_eq!(info["skipped_sources"][0], "dead");
    }

    #[test]
    fn test_camera_without_video_fails() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        let frames = SealedBuffer::Frames {
            dir: session.path().join("frames").join("cam"),
            timestamps: vec![Duration::from_millis(1), Duration::from_millis(2)],
        };
        save_session(
            session.path(),
            vec![("cam", SourceKind::Camera, frames)],
            SessionState::Saved,
        );

        assert!(matches!(
            convert_session(session.path(), out.path(), &ConvertOptions::default()),
            Err(ConversionError::MissingVideo { .. })
        ));
    }

    #[test]
    fn test_camera_video_is_copied() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        let frames = SealedBuffer::Frames {
            dir: session.path().join("frames").join("cam"),
            timestamps: vec![Duration::from_millis(1), Duration::from_millis(2)],
        };
        save_session_with_videos(
            session.path(),
            vec![
                ("cam", SourceKind::Camera, frames),
                ("joint_pos", SourceKind::Sensor, numeric("joint_pos", SourceKind::Sensor, 3, 2)),
            ],
            SessionState::Saved,
            &["cam"],
        );
        let layout = SessionLayout::new(session.path());
        fs::create_dir_all(layout.videos_dir()).unwrap();
        fs::write(layout.video_path("cam", "mp4"), b"not really a video").unwrap();

        let summary = convert_session(session.path(), out.path(), &ConvertOptions::default()).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.reference_source, "joint_pos");

        let copied = out
            .path()
            .join("videos")
            .join("observation.images.cam")
            .join("episode_000000.mp4");
        assert_eq!(fs::read(copied).unwrap(), b"not really a video");
        assert!(read_episode(out.path()).column_by_name("observation.images.cam").is_some());
    }

    #[test]
    fn test_video_without_encode_record_fails() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        let frames = SealedBuffer::Frames {
            dir: session.path().join("frames").join("cam"),
            timestamps: vec![Duration::from_millis(1), Duration::from_millis(2)],
        };
        save_session(
            session.path(),
            vec![("cam", SourceKind::Camera, frames)],
            SessionState::Saved,
        );
        // Left behind by an encode that failed
        let layout = SessionLayout::new(session.path());
        fs::create_dir_all(layout.videos_dir()).unwrap();
        fs::write(layout.video_path("cam", "mp4"), b"garbage").unwrap();

        assert!(matches!(
            convert_session(session.path(), out.path(), &ConvertOptions::default()),
            Err(ConversionError::MissingVideo { .. })
        ));
        assert!(!out.path().join("videos").exists());
    }

    #[test]
    fn test_output_inside_session_is_rejected_after_resolving() {
        let root = tempdir().unwrap();
        let session_dir = root.path().join("s");
        save_session(
            &session_dir,
            vec![("a", SourceKind::Sensor, numeric("a", SourceKind::Sensor, 2, 0))],
            SessionState::Saved,
        );

        // Same directory, spelled differently
        let indirect = root.path().join("other").join("..").join("s");
        fs::create_dir_all(root.path().join("other")).unwrap();
        let result = convert_session(&indirect, &session_dir.join("dataset"), &ConvertOptions::default());
        assert!(matches!(result, Err(ConversionError::OutputInsideSession(_))));

        let result = convert_session(
            &session_dir,
            &indirect.join("new").join("dataset"),
            &ConvertOptions::default(),
        );
        assert!(matches!(result, Err(ConversionError::OutputInsideSession(_))));
        assert!(!session_dir.join("new").exists());

        assert!(convert_session(&indirect, &root.path().join("dataset"), &ConvertOptions::default()).is_ok());
    }

    #[test]
    fn test_rejects_unsaved_session_and_empty_task() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        save_session(
            session.path(),
            vec![("a", SourceKind::Sensor, numeric("a", SourceKind::Sensor, 2, 0))],
            SessionState::Stopping,
        );

        assert!(matches!(
            convert_session(session.path(), out.path(), &ConvertOptions::default()),
            Err(ConversionError::NotSaved(SessionState::Stopping))
        ));
        assert!(matches!(
            convert_session(session.path(), out.path(), &ConvertOptions::new("  ")),
            Err(ConversionError::EmptyTask)
        ));
    }

    #[test]
    fn test_all_empty_session_fails() {
        let session = tempdir().unwrap();
        let out = tempdir().unwrap();
        save_session(
            session.path(),
            vec![("a", SourceKind::Sensor, numeric("a", SourceKind::Sensor, 0, 0))],
            SessionState::Saved,
        );

        assert!(matches!(
            convert_session(session.path(), out.path(), &ConvertOptions::default()),
            Err(ConversionError::EmptySession)
        ));
    }
}
