//! FFmpeg encoder wrapper
//!
//! Staged frames are encoded by an external FFmpeg process reading the PNG
//! image sequence from the frame directory.

use crate::export::types::{EncodedStream, EncodingError, VideoCodec, VideoConfig};
use crate::recorder::buffer::FrameStore;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Check whether the configured FFmpeg program can be executed
pub async fn is_ffmpeg_available(ffmpeg_path: &Path) -> bool {
    Command::new(ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Build the FFmpeg argument list for encoding an image sequence
pub fn build_encode_args(config: &VideoConfig, frame_dir: &Path, output_path: &Path) -> Vec<String> {
    let input_pattern = frame_dir.join(FrameStore::FRAME_PATTERN);

    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-framerate".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        input_pattern.to_string_lossy().to_string(),
        "-c:v".to_string(),
        config.codec.encoder().to_string(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-pix_fmt".to_string(),
        config.pixel_format.clone(),
        "-g".to_string(),
        config.keyframe_interval.to_string(),
    ];

    match config.codec {
        VideoCodec::H264 | VideoCodec::H265 => {
            // yuv420p needs even dimensions
            args.extend([
                "-vf".to_string(),
                "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ]);
        }
        VideoCodec::Av1 => {
            args.extend(["-vf".to_string(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string()]);
        }
    }

    // The output may carry a temporary suffix, so name the muxer explicitly
    args.extend(["-f".to_string(), config.codec.extension().to_string()]);
    args.push(output_path.to_string_lossy().to_string());
    args
}

/// Path FFmpeg writes to before the finished video is moved into place
fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    output_path.with_file_name(name)
}

/// Encode one source's staged frames into `output_path`.
///
/// FFmpeg writes `<output>.tmp`, which is renamed on success and removed on
/// failure, so `output_path` only ever holds a complete video.
pub async fn encode_frames(
    source: &str,
    config: &VideoConfig,
    frame_dir: &Path,
    frame_count: u64,
    output_path: &Path,
) -> Result<EncodedStream, EncodingError> {
    config.validate()?;
    if frame_count == 0 {
        return Err(EncodingError::NoFrames(source.to_string()));
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(output_path);
    let args = build_encode_args(config, frame_dir, &partial);
    tracing::info!("Encoding '{}' ({} frames): {:?}", source, frame_count, args);

    let result = match run_ffmpeg(config, &args).await {
        Ok(()) => tokio::fs::rename(&partial, output_path).await.map_err(EncodingError::from),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
            if remove_err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove partial video {:?}: {}", partial, remove_err);
            }
        }
        return Err(e);
    }

    Ok(EncodedStream {
        source: source.to_string(),
        path: output_path.to_path_buf(),
        frame_count,
        duration_secs: frame_count as f64 / config.fps as f64,
    })
}

async fn run_ffmpeg(config: &VideoConfig, args: &[String]) -> Result<(), EncodingError> {
    let output = Command::new(&config.ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| EncodingError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EncodingError::Ffmpeg(format!(
            "FFmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}
