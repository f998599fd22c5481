//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Encoder subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Name or path of the ffmpeg binary
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    /// Target video bitrate (e.g. "4500k")
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    /// Target audio bitrate (e.g. "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Output frame rate
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Maximum automatic restarts after an encoder crash
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Fixed delay before a crash restart, in seconds
    #[serde(default = "default_restart_backoff_secs")]
    pub restart_backoff_secs: u64,
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_video_bitrate() -> String {
    "4500k".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_backoff_secs() -> u64 {
    3
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_binary: default_ffmpeg_binary(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            frame_rate: default_frame_rate(),
            max_restarts: default_max_restarts(),
            restart_backoff_secs: default_restart_backoff_secs(),
        }
    }
}

/// Remote broadcast lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    /// Default privacy status for created broadcasts
    #[serde(default = "default_privacy")]
    pub privacy: String,
    /// Default category id for created broadcasts
    #[serde(default = "default_category")]
    pub category: String,
    /// Interval between readiness polls, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum readiness polls before the session is marked failed
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Fixed delay between live-transition attempts, in seconds
    #[serde(default = "default_live_retry_delay_secs")]
    pub live_retry_delay_secs: u64,
    /// Maximum live-transition attempts
    #[serde(default = "default_max_live_attempts")]
    pub max_live_attempts: u32,
}

fn default_privacy() -> String {
    "unlisted".to_string()
}

fn default_category() -> String {
    "22".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_live_retry_delay_secs() -> u64 {
    5
}

fn default_max_live_attempts() -> u32 {
    3
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            privacy: default_privacy(),
            category: default_category(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            live_retry_delay_secs: default_live_retry_delay_secs(),
            max_live_attempts: default_max_live_attempts(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Port the HTTP API listens on (bound to 127.0.0.1)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Capacity of the per-subscriber status event buffer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_listen_port() -> u16 {
    3000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Staging directory configuration for locally held media files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagingConfig {
    /// Directory for staged media (generated thumbnails, uploads)
    #[serde(default = "default_staging_dir")]
    pub dir: String,
}

fn default_staging_dir() -> String {
    "uploads".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

/// Remote platform configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    /// Ingest URL handed out by the dry-run platform
    #[serde(default = "default_ingest_url")]
    pub ingest_url: String,
}

fn default_ingest_url() -> String {
    "rtmp://127.0.0.1/live/loopcast".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            ingest_url: default_ingest_url(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - ENCODER_FFMPEG_BINARY -> encoder.ffmpeg_binary
    /// - ENCODER_VIDEO_BITRATE -> encoder.video_bitrate
    /// - ENCODER_AUDIO_BITRATE -> encoder.audio_bitrate
    /// - ENCODER_FRAME_RATE -> encoder.frame_rate
    /// - ENCODER_MAX_RESTARTS -> encoder.max_restarts
    /// - ENCODER_RESTART_BACKOFF_SECS -> encoder.restart_backoff_secs
    /// - BROADCAST_PRIVACY -> broadcast.privacy
    /// - BROADCAST_CATEGORY -> broadcast.category
    /// - BROADCAST_POLL_INTERVAL_SECS -> broadcast.poll_interval_secs
    /// - BROADCAST_MAX_POLL_ATTEMPTS -> broadcast.max_poll_attempts
    /// - BROADCAST_LIVE_RETRY_DELAY_SECS -> broadcast.live_retry_delay_secs
    /// - BROADCAST_MAX_LIVE_ATTEMPTS -> broadcast.max_live_attempts
    /// - SERVER_LISTEN_PORT -> server.listen_port
    /// - SERVER_EVENT_BUFFER -> server.event_buffer
    /// - STAGING_DIR -> staging.dir
    /// - PLATFORM_INGEST_URL -> platform.ingest_url
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("ENCODER_FFMPEG_BINARY") {
            if !val.is_empty() {
                self.encoder.ffmpeg_binary = val;
            }
        }

        if let Ok(val) = env::var("ENCODER_VIDEO_BITRATE") {
            if !val.is_empty() {
                self.encoder.video_bitrate = val;
            }
        }

        if let Ok(val) = env::var("ENCODER_AUDIO_BITRATE") {
            if !val.is_empty() {
                self.encoder.audio_bitrate = val;
            }
        }

        if let Ok(val) = env::var("ENCODER_FRAME_RATE") {
            if let Ok(fps) = val.parse::<u32>() {
                self.encoder.frame_rate = fps;
            }
        }

        if let Ok(val) = env::var("ENCODER_MAX_RESTARTS") {
            if let Ok(max) = val.parse::<u32>() {
                self.encoder.max_restarts = max;
            }
        }

        if let Ok(val) = env::var("ENCODER_RESTART_BACKOFF_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.encoder.restart_backoff_secs = secs;
            }
        }

        if let Ok(val) = env::var("BROADCAST_PRIVACY") {
            if !val.is_empty() {
                self.broadcast.privacy = val;
            }
        }

        if let Ok(val) = env::var("BROADCAST_CATEGORY") {
            if !val.is_empty() {
                self.broadcast.category = val;
            }
        }

        if let Ok(val) = env::var("BROADCAST_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.broadcast.poll_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("BROADCAST_MAX_POLL_ATTEMPTS") {
            if let Ok(max) = val.parse::<u32>() {
                self.broadcast.max_poll_attempts = max;
            }
        }

        if let Ok(val) = env::var("BROADCAST_LIVE_RETRY_DELAY_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.broadcast.live_retry_delay_secs = secs;
            }
        }

        if let Ok(val) = env::var("BROADCAST_MAX_LIVE_ATTEMPTS") {
            if let Ok(max) = val.parse::<u32>() {
                self.broadcast.max_live_attempts = max;
            }
        }

        if let Ok(val) = env::var("SERVER_LISTEN_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.listen_port = port;
            }
        }

        if let Ok(val) = env::var("SERVER_EVENT_BUFFER") {
            if let Ok(cap) = val.parse::<usize>() {
                self.server.event_buffer = cap;
            }
        }

        if let Ok(val) = env::var("STAGING_DIR") {
            if !val.is_empty() {
                self.staging.dir = val;
            }
        }

        if let Ok(val) = env::var("PLATFORM_INGEST_URL") {
            if !val.is_empty() {
                self.platform.ingest_url = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("ENCODER_FFMPEG_BINARY");
        env::remove_var("ENCODER_VIDEO_BITRATE");
        env::remove_var("ENCODER_AUDIO_BITRATE");
        env::remove_var("ENCODER_FRAME_RATE");
        env::remove_var("ENCODER_MAX_RESTARTS");
        env::remove_var("ENCODER_RESTART_BACKOFF_SECS");
        env::remove_var("BROADCAST_PRIVACY");
        env::remove_var("BROADCAST_CATEGORY");
        env::remove_var("BROADCAST_POLL_INTERVAL_SECS");
        env::remove_var("BROADCAST_MAX_POLL_ATTEMPTS");
        env::remove_var("BROADCAST_LIVE_RETRY_DELAY_SECS");
        env::remove_var("BROADCAST_MAX_LIVE_ATTEMPTS");
        env::remove_var("SERVER_LISTEN_PORT");
        env::remove_var("SERVER_EVENT_BUFFER");
        env::remove_var("STAGING_DIR");
        env::remove_var("PLATFORM_INGEST_URL");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // For any valid TOML configuration string, the loaded configuration
        // parses every section and preserves the written values.
        #[test]
        fn prop_config_parses_all_sections(
            frame_rate in 1u32..240,
            max_restarts in 0u32..16,
            backoff in 0u64..60,
            poll_interval in 0u64..120,
            max_polls in 1u32..500,
            live_delay in 0u64..120,
            max_live in 1u32..16,
            port in 1024u16..u16::MAX,
            event_buffer in 1usize..4096,
        ) {
            let toml_str = format!(
                r#"
[encoder]
ffmpeg_binary = "ffmpeg"
video_bitrate = "6000k"
audio_bitrate = "192k"
frame_rate = {frame_rate}
max_restarts = {max_restarts}
restart_backoff_secs = {backoff}

[broadcast]
privacy = "public"
category = "24"
poll_interval_secs = {poll_interval}
max_poll_attempts = {max_polls}
live_retry_delay_secs = {live_delay}
max_live_attempts = {max_live}

[server]
listen_port = {port}
event_buffer = {event_buffer}

[staging]
dir = "staged"

[platform]
ingest_url = "rtmp://example.invalid/live/key"
"#
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.encoder.video_bitrate, "6000k");
            prop_assert_eq!(config.encoder.audio_bitrate, "192k");
            prop_assert_eq!(config.encoder.frame_rate, frame_rate);
            prop_assert_eq!(config.encoder.max_restarts, max_restarts);
            prop_assert_eq!(config.encoder.restart_backoff_secs, backoff);
            prop_assert_eq!(config.broadcast.privacy, "public");
            prop_assert_eq!(config.broadcast.category, "24");
            prop_assert_eq!(config.broadcast.poll_interval_secs, poll_interval);
            prop_assert_eq!(config.broadcast.max_poll_attempts, max_polls);
            prop_assert_eq!(config.broadcast.live_retry_delay_secs, live_delay);
            prop_assert_eq!(config.broadcast.max_live_attempts, max_live);
            prop_assert_eq!(config.server.listen_port, port);
            prop_assert_eq!(config.server.event_buffer, event_buffer);
            prop_assert_eq!(config.staging.dir, "staged");
            prop_assert_eq!(config.platform.ingest_url, "rtmp://example.invalid/live/key");
        }

        #[test]
        fn prop_env_overrides_max_restarts(
            initial in 0u32..8,
            overridden in 0u32..32,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[encoder]
max_restarts = {initial}
"#
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("ENCODER_MAX_RESTARTS", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.max_restarts, overridden);
        }

        #[test]
        fn prop_env_overrides_poll_interval(
            initial in 0u64..30,
            overridden in 0u64..120,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[broadcast]
poll_interval_secs = {initial}
"#
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("BROADCAST_POLL_INTERVAL_SECS", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.broadcast.poll_interval_secs, overridden);
        }

        #[test]
        fn prop_env_overrides_listen_port(
            initial in 1024u16..u16::MAX,
            overridden in 1024u16..u16::MAX,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[server]
listen_port = {initial}
"#
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SERVER_LISTEN_PORT", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.server.listen_port, overridden);
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.encoder.ffmpeg_binary, "ffmpeg");
        assert_eq!(config.encoder.video_bitrate, "4500k");
        assert_eq!(config.encoder.audio_bitrate, "128k");
        assert_eq!(config.encoder.frame_rate, 30);
        assert_eq!(config.encoder.max_restarts, 3);
        assert_eq!(config.encoder.restart_backoff_secs, 3);
        assert_eq!(config.broadcast.privacy, "unlisted");
        assert_eq!(config.broadcast.category, "22");
        assert_eq!(config.broadcast.poll_interval_secs, 5);
        assert_eq!(config.broadcast.max_poll_attempts, 60);
        assert_eq!(config.broadcast.live_retry_delay_secs, 5);
        assert_eq!(config.broadcast.max_live_attempts, 3);
        assert_eq!(config.server.listen_port, 3000);
        assert_eq!(config.server.event_buffer, 256);
        assert_eq!(config.staging.dir, "uploads");
        assert_eq!(config.platform.ingest_url, "rtmp://127.0.0.1/live/loopcast");
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[encoder]
max_restarts = 5
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.encoder.max_restarts, 5);
        assert_eq!(config.encoder.ffmpeg_binary, "ffmpeg"); // default
        assert_eq!(config.broadcast.poll_interval_secs, 5); // default
        assert_eq!(config.server.listen_port, 3000); // default
        assert_eq!(config.staging.dir, "uploads"); // default
    }

    #[test]
    fn test_string_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("ENCODER_FFMPEG_BINARY", "/usr/local/bin/ffmpeg");
        env::set_var("STAGING_DIR", "/var/lib/loopcast/staging");
        env::set_var("PLATFORM_INGEST_URL", "rtmp://ingest.example/live/abc");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.ffmpeg_binary, "/usr/local/bin/ffmpeg");
        assert_eq!(config.staging.dir, "/var/lib/loopcast/staging");
        assert_eq!(config.platform.ingest_url, "rtmp://ingest.example/live/abc");
    }

    #[test]
    fn test_invalid_numeric_env_value_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("ENCODER_MAX_RESTARTS", "not-a-number");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.max_restarts, 3); // unchanged default
    }
}
