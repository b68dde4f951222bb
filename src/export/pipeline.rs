//! Video pipeline orchestration
//!
//! After a session stops, every camera source with staged frames is encoded
//! by its own FFmpeg process. Encodes run concurrently and one failing source
//! never affects the others.

use crate::export::ffmpeg::encode_frames;
use crate::export::types::{EncodedStream, EncodingError, VideoConfig};
use std::path::PathBuf;
use tokio::task::JoinSet;

/// One camera source awaiting encoding
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub source: String,
    pub frame_dir: PathBuf,
    pub frame_count: u64,
    pub output_path: PathBuf,
}

/// Outcome of encoding one source
#[derive(Debug)]
pub struct EncodeOutcome {
    pub source: String,
    pub result: Result<EncodedStream, EncodingError>,
}

/// Concurrent per-source encoder
pub struct VideoPipeline {
    config: VideoConfig,
}

impl VideoPipeline {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// Encode all jobs, returning outcomes sorted by source name.
    ///
    /// Staged frames are removed after a successful encode and kept otherwise.
    pub async fn run(&self, jobs: Vec<EncodeJob>) -> Vec<EncodeOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }
        tracing::info!("Encoding {} camera stream(s)", jobs.len());

        let mut set = JoinSet::new();
        let mut pending: Vec<String> = Vec::with_capacity(jobs.len());

        for job in jobs {
            let config = self.config.clone();
            pending.push(job.source.clone());
            set.spawn(async move {
                let result = encode_frames(
                    &job.source,
                    &config,
                    &job.frame_dir,
                    job.frame_count,
                    &job.output_path,
                )
                .await;

                match &result {
                    Ok(stream) => {
                        tracing::info!(
                            "Encoded '{}': {} frames -> {:?}",
                            job.source,
                            stream.frame_count,
                            stream.path
                        );
                        if let Err(e) = tokio::fs::remove_dir_all(&job.frame_dir).await {
                            tracing::warn!(
                                "Failed to remove staged frames {:?}: {}",
                                job.frame_dir,
                                e
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "Encoding '{}' failed, keeping frames in {:?}: {}",
                            job.source,
                            job.frame_dir,
                            e
                        );
                    }
                }

                EncodeOutcome {
                    source: job.source,
                    result,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.retain(|s| s != &outcome.source);
                    outcomes.push(outcome);
                }
                Err(e) => tracing::error!("Encode task aborted: {}", e),
            }
        }

        // Tasks that panicked or were cancelled never produced an outcome
        for source in pending {
            outcomes.push(EncodeOutcome {
                result: Err(EncodingError::Task(format!("encode task for '{}' did not finish", source))),
                source,
            });
        }

        outcomes.sort_by(|a, b| a.source.cmp(&b.source));
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ImageFrame, Payload, PixelFormat, SourceKind};
    use crate::export::ffmpeg::is_ffmpeg_available;
    use crate::recorder::buffer::SourceBuffer;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn stage_frames(dir: &Path, name: &str, count: u64) -> EncodeJob {
        let frame_dir = dir.join("frames").join(name);
        let mut buffer = SourceBuffer::new(name, SourceKind::Camera, frame_dir.clone());
        for i in 0..count {
            let frame = ImageFrame::new(8, 8, PixelFormat::Rgb8, vec![(i * 20) as u8; 192]);
            buffer
                .push(Duration::from_millis(i * 33 + 1), Payload::Image(frame))
                .unwrap();
        }
        EncodeJob {
            source: name.to_string(),
            frame_dir,
            frame_count: count,
            output_path: dir.join("videos").join(format!("{}.mp4", name)),
        }
    }

    #[tokio::test]
    async fn test_failed_encode_keeps_frames() {
        let dir = tempdir().unwrap();
        let job = stage_frames(dir.path(), "camera_left", 3);
        let frame_dir = job.frame_dir.clone();

        let pipeline = VideoPipeline::new(VideoConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..VideoConfig::default()
        });
        let outcomes = pipeline.run(vec![job]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
        assert!(frame_dir.join("frame_000000.png").exists());
    }

    #[tokio::test]
    async fn test_outcomes_are_sorted_and_independent() {
        let dir = tempdir().unwrap();
        let jobs = vec![
            stage_frames(dir.path(), "wrist", 2),
            stage_frames(dir.path(), "overhead", 0),
        ];

        let pipeline = VideoPipeline::new(VideoConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ..VideoConfig::default()
        });
        let outcomes = pipeline.run(jobs).await;

        assert_eq!(outcomes[0].source, "overhead");
        assert!(matches!(outcomes[0].result, Err(EncodingError::NoFrames(_))));
        assert_eq!(outcomes[1].source, "wrist");
        assert!(matches!(outcomes[1].result, Err(EncodingError::Ffmpeg(_))));
    }

    #[tokio::test]
    async fn test_successful_encode_removes_frames() {
        let config = VideoConfig::default();
        if !is_ffmpeg_available(&config.ffmpeg_path).await {
            return;
        }

        let dir = tempdir().unwrap();
        let job = stage_frames(dir.path(), "camera_right", 4);
        let frame_dir = job.frame_dir.clone();
        let output = job.output_path.clone();

        let outcomes = VideoPipeline::new(config).run(vec![job]).await;
        let stream = outcomes[0].result.as_ref().unwrap();

        assert_eq!(stream.frame_count, 4);
        assert!(output.exists());
        assert!(!frame_dir.exists());
    }
}
