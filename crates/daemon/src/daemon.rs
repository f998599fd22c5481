//! Daemon startup and wiring for Loopcast
//!
//! Assembles the event bus, supervisor, coordinator, and HTTP server from a
//! configuration and an injected platform. No ambient singletons: every
//! instance is isolated, so tests can build as many daemons as they need.

use crate::api::{run_server, AppState, ServerError};
use crate::coordinator::Coordinator;
use crate::events::EventBus;
use crate::platform::BroadcastPlatform;
use crate::staging::Staging;
use crate::startup::{check_ffmpeg_available, StartupError};
use crate::supervisor::Supervisor;
use loopcast_config::{Config, ConfigError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Staging directory error
    #[error("Staging directory error: {0}")]
    Staging(std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Status event channel shared by all components
    pub bus: EventBus,
    /// Session coordinator
    pub coordinator: Coordinator,
    platform: Arc<dyn BroadcastPlatform>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Performs the full startup sequence:
    /// 1. Load config from file and apply environment overrides
    /// 2. Run the ffmpeg preflight check
    /// 3. Ensure the staging directory exists
    /// 4. Wire the event bus, supervisor, and coordinator
    pub async fn new<P: AsRef<Path>>(
        config_path: P,
        platform: Arc<dyn BroadcastPlatform>,
    ) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config, platform).await
    }

    /// Initialize the daemon with an existing configuration
    pub async fn with_config(
        config: Config,
        platform: Arc<dyn BroadcastPlatform>,
    ) -> Result<Self, DaemonError> {
        check_ffmpeg_available(&config.encoder.ffmpeg_binary)?;
        Self::assemble(config, platform).await
    }

    /// Initialize without startup checks
    ///
    /// For test environments where ffmpeg is not installed.
    pub async fn new_without_checks(
        config: Config,
        platform: Arc<dyn BroadcastPlatform>,
    ) -> Result<Self, DaemonError> {
        Self::assemble(config, platform).await
    }

    async fn assemble(
        config: Config,
        platform: Arc<dyn BroadcastPlatform>,
    ) -> Result<Self, DaemonError> {
        let staging = Staging::new(config.staging.dir.clone());
        staging.ensure().await.map_err(DaemonError::Staging)?;

        let bus = EventBus::new(config.server.event_buffer);
        let supervisor = Supervisor::new(
            config.encoder.ffmpeg_binary.clone(),
            Duration::from_secs(config.encoder.restart_backoff_secs),
            bus.clone(),
        );
        let coordinator = Coordinator::new(
            config.clone(),
            platform.clone(),
            supervisor,
            bus.clone(),
            staging,
        );

        Ok(Self {
            config,
            bus,
            coordinator,
            platform,
        })
    }

    /// Run the HTTP API server until it exits.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            bus: self.bus.clone(),
            platform: self.platform.clone(),
        };
        run_server(state, self.config.server.listen_port).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DryRunPlatform;
    use tempfile::tempdir;

    fn test_platform() -> Arc<dyn BroadcastPlatform> {
        Arc::new(DryRunPlatform::new(
            "rtmp://127.0.0.1/live/test".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_new_without_checks_creates_staging_dir() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.staging.dir = dir
            .path()
            .join("uploads")
            .to_string_lossy()
            .into_owned();

        let daemon = Daemon::new_without_checks(config, test_platform())
            .await
            .unwrap();

        assert!(daemon.coordinator.staging().dir().is_dir());
        let status = daemon.coordinator.status().await;
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_with_config_fails_on_missing_binary() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.encoder.ffmpeg_binary = "definitely-not-a-real-binary".to_string();
        config.staging.dir = dir.path().to_string_lossy().into_owned();

        let result = Daemon::with_config(config, test_platform()).await;
        assert!(matches!(result, Err(DaemonError::Startup(_))));
    }

    #[tokio::test]
    async fn test_daemons_are_isolated() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.staging.dir = dir.path().to_string_lossy().into_owned();

        let first = Daemon::new_without_checks(config.clone(), test_platform())
            .await
            .unwrap();
        let second = Daemon::new_without_checks(config, test_platform())
            .await
            .unwrap();

        // Events on one daemon's bus never reach the other's subscribers.
        let mut rx = second.bus.subscribe();
        first.bus.emit(crate::events::StatusEvent::Error {
            message: "only on first".to_string(),
            timestamp_unix_ms: 0,
        });
        assert!(rx.try_recv().is_err());
    }
}
