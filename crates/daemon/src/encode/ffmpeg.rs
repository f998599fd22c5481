//! ffmpeg pipeline builder for Loopcast
//!
//! Builds the argument vector for the RTMP push pipeline and provides
//! thumbnail extraction. The pipeline reads a local source (optionally
//! looped), optionally prefixes a cover lead-in, and encodes to H.264/AAC
//! in an FLV container pointed at the ingest URL.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Duration of the cover lead-in before the main source starts, in seconds.
const COVER_LEAD_IN_SECS: u32 = 10;

/// Offset into the source for thumbnail extraction.
const THUMBNAIL_OFFSET: &str = "00:00:02";

/// Rate-control buffer size for the x264 encode.
const RATE_BUFFER: &str = "8M";

/// File extensions treated as still-image covers.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg exited with non-zero status
    #[error("ffmpeg failed with exit code: {0}")]
    FfmpegFailed(i32),

    /// ffmpeg was terminated by signal
    #[error("ffmpeg process was terminated by signal")]
    FfmpegTerminated,

    /// ffmpeg succeeded but the expected output file is missing
    #[error("Expected output file was not created: {0}")]
    MissingOutput(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable description of one encoder run.
///
/// Built once per session start; restarts respawn ffmpeg with the same spec.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    /// Path to the main source video
    pub source_path: PathBuf,
    /// Optional cover shown as a fixed lead-in before the source
    pub cover_path: Option<PathBuf>,
    /// RTMP ingest URL the encoded stream is pushed to
    pub ingest_url: String,
    /// Target video bitrate (also used as maxrate)
    pub video_bitrate: String,
    /// Target audio bitrate
    pub audio_bitrate: String,
    /// Output frame rate
    pub frame_rate: u32,
    /// Whether the main source loops indefinitely
    pub loop_source: bool,
    /// Maximum automatic restarts after a crash
    pub max_restarts: u32,
}

/// Returns true if the path has a still-image extension.
pub fn is_image_cover(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == lower)
        })
        .unwrap_or(false)
}

/// Build the full ffmpeg argument vector for a pipeline spec.
///
/// Deterministic: the same spec always produces the same arguments. Three
/// input layouts exist:
/// - no cover: the source alone;
/// - image cover: the image held for the lead-in with a synthesized silent
///   stereo track, concatenated ahead of the source;
/// - video cover: the cover's own video and audio, concatenated ahead of
///   the source.
pub fn build_ffmpeg_args(spec: &PipelineSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".to_string()];

    match &spec.cover_path {
        None => {
            push_source_input(&mut args, spec);
        }
        Some(cover) if is_image_cover(cover) => {
            // Still image held for the lead-in plus silent audio, so both
            // concat segments carry a video and an audio stream.
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-t".to_string(),
                COVER_LEAD_IN_SECS.to_string(),
                "-f".to_string(),
                "image2".to_string(),
                "-i".to_string(),
                cover.to_string_lossy().into_owned(),
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                COVER_LEAD_IN_SECS.to_string(),
                "-i".to_string(),
                "anullsrc=cl=stereo:r=44100".to_string(),
            ]);
            push_source_input(&mut args, spec);
            args.extend([
                "-filter_complex".to_string(),
                image_cover_filter(),
                "-map".to_string(),
                "[outv]".to_string(),
                "-map".to_string(),
                "[outa]".to_string(),
            ]);
        }
        Some(cover) => {
            args.extend([
                "-re".to_string(),
                "-t".to_string(),
                COVER_LEAD_IN_SECS.to_string(),
                "-i".to_string(),
                cover.to_string_lossy().into_owned(),
            ]);
            push_source_input(&mut args, spec);
            args.extend([
                "-filter_complex".to_string(),
                "[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[outv][outa]".to_string(),
                "-map".to_string(),
                "[outv]".to_string(),
                "-map".to_string(),
                "[outa]".to_string(),
            ]);
        }
    }

    push_encode_tail(&mut args, spec);
    args
}

/// Append the main source input, with loop flag when requested.
fn push_source_input(args: &mut Vec<String>, spec: &PipelineSpec) {
    if spec.loop_source {
        args.extend(["-stream_loop".to_string(), "-1".to_string()]);
    }
    args.extend([
        "-re".to_string(),
        "-i".to_string(),
        spec.source_path.to_string_lossy().into_owned(),
    ]);
}

/// Filter graph for the image-cover layout.
///
/// Both segments are scaled and padded to 1280x720 so concat sees matching
/// frame geometry.
fn image_cover_filter() -> String {
    let scale = "scale=1280:720:force_original_aspect_ratio=decrease,\
                 pad=1280:720:(ow-iw)/2:(oh-ih)/2,setsar=1";
    format!(
        "[0:v]{scale}[v0];[1:a]anull[a0];[2:v]{scale}[v1];\
         [v0][a0][v1][2:a]concat=n=2:v=1:a=1[outv][outa]"
    )
}

/// Append the shared encode and output arguments.
fn push_encode_tail(args: &mut Vec<String>, spec: &PipelineSpec) {
    let gop = spec.frame_rate * 2;
    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-b:v".to_string(),
        spec.video_bitrate.clone(),
        "-maxrate".to_string(),
        spec.video_bitrate.clone(),
        "-bufsize".to_string(),
        RATE_BUFFER.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        spec.frame_rate.to_string(),
        "-g".to_string(),
        gop.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        spec.audio_bitrate.clone(),
        "-ar".to_string(),
        "44100".to_string(),
        "-f".to_string(),
        "flv".to_string(),
        spec.ingest_url.clone(),
    ]);
}

/// Extract a single frame from a video as a thumbnail image.
///
/// Seeks to a fixed two-second offset and writes one frame to `output`.
/// Verifies both the exit status and that the output file exists.
pub async fn extract_thumbnail(
    binary: &str,
    video: &Path,
    output: &Path,
) -> Result<(), EncodeError> {
    let status = Command::new(binary)
        .arg("-y")
        .arg("-ss")
        .arg(THUMBNAIL_OFFSET)
        .arg("-i")
        .arg(video)
        .arg("-frames:v")
        .arg("1")
        .arg(output)
        .status()
        .await?;

    if !status.success() {
        return match status.code() {
            Some(code) => Err(EncodeError::FfmpegFailed(code)),
            None => Err(EncodeError::FfmpegTerminated),
        };
    }

    if !output.exists() {
        return Err(EncodeError::MissingOutput(output.to_path_buf()));
    }

    Ok(())
}
