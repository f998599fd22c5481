//! Startup checks module for the Loopcast daemon
//!
//! Verifies that the configured ffmpeg binary exists and produces a
//! recognizable version banner before the daemon accepts sessions.

use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("Could not parse ffmpeg version: {0}")]
    FfmpegVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse the ffmpeg version token from `-version` output.
///
/// Handles standard builds ("ffmpeg version 6.1.1 ...") and n-prefixed git
/// builds ("ffmpeg version n6.1-42-gabc ..."); returns the version with the
/// `n` prefix stripped.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<String> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let token = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version = token.trim_start_matches('n');

    // Require a leading digit so arbitrary text is not mistaken for a
    // version.
    if version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        Some(version.to_string())
    } else {
        None
    }
}

/// Check that the configured ffmpeg binary runs and reports a version.
///
/// Runs `<binary> -version` and parses the banner. Fails startup with a
/// descriptive error when the binary is missing or the output is
/// unrecognizable.
pub fn check_ffmpeg_available(binary: &str) -> Result<(), StartupError> {
    let output = Command::new(binary).arg("-version").output().map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
            binary, e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            binary, output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let version = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "Unrecognized output from {} -version: {}",
            binary,
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    info!(binary, version, "ffmpeg available");
    Ok(())
}
