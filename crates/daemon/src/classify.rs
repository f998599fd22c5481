//! Classifier module for categorizing ffmpeg stderr output.
//!
//! ffmpeg reports progress, ingest acknowledgements, and failures as free-form
//! stderr text. This module maps each line to a semantic class with an ordered
//! keyword chain. Misclassification of unusual lines is a known limitation of
//! text heuristics; unmatched lines are simply forwarded raw.

use serde::{Deserialize, Serialize};

/// Semantic class of an ffmpeg stderr line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineClass {
    /// Frame progress output; the encoder is producing data.
    Encoding,
    /// The ingest endpoint is accepting interleaved frames.
    StreamAccepted,
    /// An error or failure was reported.
    Error,
}

impl std::fmt::Display for LineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineClass::Encoding => write!(f, "encoding"),
            LineClass::StreamAccepted => write!(f, "stream_accepted"),
            LineClass::Error => write!(f, "error"),
        }
    }
}

/// Classifies a single ffmpeg stderr line.
///
/// Rules apply in order, first match wins:
/// 1. Contains both `frame=` and `fps=` -> `Encoding`. Progress lines can
///    mention "error" counters, so this rule outranks the error rule.
/// 2. Contains `av_interleaved_write_frame` -> `StreamAccepted`.
/// 3. Contains "error" or "failed" (case-insensitive) -> `Error`.
/// 4. Otherwise `None`.
pub fn classify_line(line: &str) -> Option<LineClass> {
    if line.contains("frame=") && line.contains("fps=") {
        return Some(LineClass::Encoding);
    }

    if line.contains("av_interleaved_write_frame") {
        return Some(LineClass::StreamAccepted);
    }

    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        return Some(LineClass::Error);
    }

    None
}
