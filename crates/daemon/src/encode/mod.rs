//! Encoder pipeline specification and ffmpeg command construction.

pub mod ffmpeg;

pub use ffmpeg::*;
