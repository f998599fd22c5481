//! Session lifecycle coordinator.
//!
//! Drives one session at a time through provisioning, encoding, readiness
//! polling, and the forced live transition, and tears everything down on
//! stop. The coordinator is the only writer of the session record; the
//! supervisor owns the encoder handle.

use crate::encode::{extract_thumbnail, PipelineSpec};
use crate::events::{unix_ms, EventBus, StatusEvent};
use crate::platform::{BroadcastPlatform, BroadcastRequest, PlatformError, RemoteLifecycle};
use crate::staging::Staging;
use crate::supervisor::{Supervisor, SupervisorError};
use loopcast_config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Error type for coordinator operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A session is already active
    #[error("A session is already active")]
    SessionBusy,

    /// The requested source file does not exist
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    /// Remote provisioning failed
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(#[from] PlatformError),

    /// Thumbnail extraction or upload failed
    #[error("Thumbnail failed: {0}")]
    ThumbnailFailed(String),

    /// The encoder could not be started
    #[error("Encoder start failed: {0}")]
    EncoderStart(#[from] SupervisorError),
}

/// Local lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Provisioning,
    Encoding,
    AwaitingReady,
    Live,
    Stopping,
    Ended,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Encoding => "encoding",
            LifecycleState::AwaitingReady => "awaiting_ready",
            LifecycleState::Live => "live",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Ended => "ended",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Parameters for starting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    /// Local source video to loop into the broadcast
    pub source_path: PathBuf,
    /// Optional cover shown as a lead-in before the source
    #[serde(default)]
    pub cover_path: Option<PathBuf>,
    /// Optional thumbnail image; auto-extracted from the source when absent
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Privacy override; config default when absent
    #[serde(default)]
    pub privacy: Option<String>,
    /// Category override; config default when absent
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub video_bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    #[serde(default)]
    pub frame_rate: Option<u32>,
    #[serde(default = "default_loop_source")]
    pub loop_source: bool,
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

fn default_title() -> String {
    "Loopcast stream".to_string()
}

fn default_loop_source() -> bool {
    true
}

/// Synchronous result of a successful start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: Uuid,
    pub broadcast_id: String,
    pub ingest_url: String,
}

/// Combined session and encoder status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub running: bool,
    pub retry_count: u32,
    pub max_retry: u32,
    pub lifecycle_state: LifecycleState,
}

/// One session's record. The coordinator is the sole writer.
#[derive(Debug)]
struct Session {
    id: Uuid,
    state: LifecycleState,
    broadcast_id: Option<String>,
    ingest_url: Option<String>,
    started_unix_ms: Option<u64>,
    staged_thumbnail: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Session {
    fn idle() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: LifecycleState::Idle,
            broadcast_id: None,
            ingest_url: None,
            started_unix_ms: None,
            staged_thumbnail: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Coordinates the session lifecycle across the platform and the encoder.
#[derive(Clone)]
pub struct Coordinator {
    config: Config,
    platform: Arc<dyn BroadcastPlatform>,
    supervisor: Supervisor,
    bus: EventBus,
    staging: Staging,
    session: Arc<Mutex<Session>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        platform: Arc<dyn BroadcastPlatform>,
        supervisor: Supervisor,
        bus: EventBus,
        staging: Staging,
    ) -> Self {
        Self {
            config,
            platform,
            supervisor,
            bus,
            staging,
            session: Arc::new(Mutex::new(Session::idle())),
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Start a session.
    ///
    /// Fails with `SessionBusy` unless the session is `Idle`. Provisioning
    /// (create, bind, thumbnail) happens synchronously; any failure marks
    /// the session `Failed`, cleans staged files, and surfaces the error to
    /// the caller with no automatic retry. On success the encoder is
    /// started and a watcher task drives the readiness poll and the live
    /// transition.
    pub async fn start(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartedSession, CoordinatorError> {
        let mut session = self.session.lock().await;
        if session.state != LifecycleState::Idle {
            return Err(CoordinatorError::SessionBusy);
        }

        if !request.source_path.exists() {
            return Err(CoordinatorError::SourceNotFound(request.source_path));
        }

        *session = Session::idle();
        session.state = LifecycleState::Provisioning;
        let session_id = session.id;
        info!(%session_id, source = %request.source_path.display(), "session provisioning");

        // The lock stays held through provisioning: start is the only
        // operation that runs here, and holding it keeps the state machine
        // single-writer through the create/bind/thumbnail sequence.
        let provision_result = self.provision(&mut session, &request).await;
        let provisioned = match provision_result {
            Ok(p) => p,
            Err(e) => {
                session.state = LifecycleState::Failed;
                let staged = session.staged_thumbnail.take();
                drop(session);
                self.discard_staged(staged).await;
                return Err(e);
            }
        };

        let spec = self.pipeline_spec(&request, provisioned.ingest_url.clone());
        let max_restarts = spec.max_restarts;

        // Subscribe before the supervisor starts so the synchronous
        // Started event is buffered for the watchers.
        let watcher_rx = self.bus.subscribe();
        let terminal_rx = self.bus.subscribe();

        if let Err(e) = self.supervisor.start(spec).await {
            session.state = LifecycleState::Failed;
            let staged = session.staged_thumbnail.take();
            drop(session);
            self.discard_staged(staged).await;
            return Err(e.into());
        }

        session.state = LifecycleState::Encoding;
        session.broadcast_id = Some(provisioned.broadcast_id.clone());
        session.ingest_url = Some(provisioned.ingest_url.clone());
        session.started_unix_ms = Some(unix_ms());
        let cancel = session.cancel.clone();
        drop(session);

        info!(%session_id, broadcast_id = %provisioned.broadcast_id, max_restarts, "encoder running");

        let coordinator = self.clone();
        let broadcast_id = provisioned.broadcast_id.clone();
        let watch_cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .watch(watcher_rx, broadcast_id, watch_cancel)
                .await;
        });

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.watch_encoder_terminal(terminal_rx, cancel).await;
        });

        Ok(StartedSession {
            session_id,
            broadcast_id: provisioned.broadcast_id,
            ingest_url: provisioned.ingest_url,
        })
    }

    /// Stop the session. Idempotent and safe in every state.
    ///
    /// Returns whether an encoder was actually stopped.
    pub async fn stop(&self) -> bool {
        let (broadcast_id, staged) = {
            let mut session = self.session.lock().await;
            if session.state == LifecycleState::Idle {
                // Nothing to stop; don't publish a transient Stopping.
                drop(session);
                return self.supervisor.stop().await;
            }
            session.cancel.cancel();
            session.state = LifecycleState::Stopping;
            (session.broadcast_id.take(), session.staged_thumbnail.take())
        };

        let stopped = self.supervisor.stop().await;

        if let Some(broadcast_id) = &broadcast_id {
            // Best effort: a remote failure must not block local cleanup.
            if let Err(e) = self
                .platform
                .transition_broadcast(broadcast_id, RemoteLifecycle::Complete)
                .await
            {
                warn!(broadcast_id, error = %e, "end-broadcast transition failed");
            }
        }

        self.discard_staged(staged).await;

        let mut session = self.session.lock().await;
        session.state = LifecycleState::Ended;
        info!(session_id = %session.id, stopped, "session ended");
        *session = Session::idle();

        stopped
    }

    /// Combined status snapshot for the API.
    pub async fn status(&self) -> SessionStatus {
        let encoder = self.supervisor.status().await;
        let state = self.session.lock().await.state;
        SessionStatus {
            running: encoder.running,
            retry_count: encoder.retry_count,
            max_retry: encoder.max_retry,
            lifecycle_state: state,
        }
    }

    /// Create the broadcast, bind the ingest, and attach the thumbnail.
    async fn provision(
        &self,
        session: &mut Session,
        request: &StartSessionRequest,
    ) -> Result<crate::platform::Provisioned, CoordinatorError> {
        let broadcast_request = BroadcastRequest {
            title: request.title.clone(),
            description: request.description.clone(),
            privacy: request
                .privacy
                .clone()
                .unwrap_or_else(|| self.config.broadcast.privacy.clone()),
            category: request
                .category
                .clone()
                .unwrap_or_else(|| self.config.broadcast.category.clone()),
        };

        let provisioned = self
            .platform
            .create_ingest_and_broadcast(&broadcast_request)
            .await?;
        self.platform
            .bind_ingest(&provisioned.broadcast_id, &provisioned.ingest_id)
            .await?;

        let thumbnail = match &request.thumbnail_path {
            Some(path) => path.clone(),
            None => {
                let path = self.staging.thumbnail_path(&session.id.to_string());
                extract_thumbnail(
                    &self.config.encoder.ffmpeg_binary,
                    &request.source_path,
                    &path,
                )
                .await
                .map_err(|e| CoordinatorError::ThumbnailFailed(e.to_string()))?;
                // Recorded immediately so failure cleanup finds it.
                session.staged_thumbnail = Some(path.clone());
                path
            }
        };

        self.platform
            .set_thumbnail(&provisioned.broadcast_id, &thumbnail)
            .await?;

        Ok(provisioned)
    }

    /// Build the pipeline spec from the request with config defaults.
    fn pipeline_spec(&self, request: &StartSessionRequest, ingest_url: String) -> PipelineSpec {
        PipelineSpec {
            source_path: request.source_path.clone(),
            cover_path: request.cover_path.clone(),
            ingest_url,
            video_bitrate: request
                .video_bitrate
                .clone()
                .unwrap_or_else(|| self.config.encoder.video_bitrate.clone()),
            audio_bitrate: request
                .audio_bitrate
                .clone()
                .unwrap_or_else(|| self.config.encoder.audio_bitrate.clone()),
            frame_rate: request.frame_rate.unwrap_or(self.config.encoder.frame_rate),
            loop_source: request.loop_source,
            max_restarts: request
                .max_restarts
                .unwrap_or(self.config.encoder.max_restarts),
        }
    }

    /// Background task: wait for encoder output, poll readiness, and force
    /// the broadcast live.
    async fn watch(
        &self,
        mut rx: tokio::sync::broadcast::Receiver<StatusEvent>,
        broadcast_id: String,
        cancel: CancellationToken,
    ) {
        // Wait until the encoder is actually producing before polling.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Ok(StatusEvent::Started { .. }) | Ok(StatusEvent::Encoding { .. }) => break,
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            }
        }

        self.set_state(&cancel, LifecycleState::AwaitingReady).await;

        let poll_interval = Duration::from_secs(self.config.broadcast.poll_interval_secs);
        let max_polls = self.config.broadcast.max_poll_attempts;
        let mut ready = false;

        for attempt in 1..=max_polls {
            match self.platform.poll_broadcast_state(&broadcast_id).await {
                Ok(RemoteLifecycle::Ready) => {
                    ready = true;
                    break;
                }
                Ok(RemoteLifecycle::Live) => {
                    // Remote went live on its own; nothing left to force.
                    self.set_state(&cancel, LifecycleState::Live).await;
                    return;
                }
                Ok(state) => {
                    info!(broadcast_id, attempt, max_polls, %state, "broadcast not ready");
                }
                Err(e) => {
                    // Transport failures consume an attempt like a
                    // not-ready response does.
                    warn!(broadcast_id, attempt, max_polls, error = %e, "readiness poll failed");
                }
            }

            // No point waiting out the interval after the last attempt.
            if attempt < max_polls {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        if !ready {
            warn!(broadcast_id, max_polls, "broadcast never became ready");
            self.bus.emit(StatusEvent::Error {
                message: format!(
                    "Broadcast {} not ready after {} polls",
                    broadcast_id, max_polls
                ),
                timestamp_unix_ms: unix_ms(),
            });
            self.set_state(&cancel, LifecycleState::Failed).await;
            return;
        }

        // Forced live transition with bounded fixed-delay retries. On
        // exhaustion the encoder keeps running so an operator can finish
        // the transition out of band.
        let retry_delay = Duration::from_secs(self.config.broadcast.live_retry_delay_secs);
        let max_attempts = self.config.broadcast.max_live_attempts;

        for attempt in 1..=max_attempts {
            match self
                .platform
                .transition_broadcast(&broadcast_id, RemoteLifecycle::Live)
                .await
            {
                Ok(()) => {
                    info!(broadcast_id, attempt, "broadcast live");
                    self.set_state(&cancel, LifecycleState::Live).await;
                    return;
                }
                Err(e) => {
                    warn!(broadcast_id, attempt, max_attempts, error = %e, "live transition failed");
                    self.bus.emit(StatusEvent::Error {
                        message: format!("Live transition failed: {}", e),
                        timestamp_unix_ms: unix_ms(),
                    });
                    if attempt < max_attempts {
                        self.bus.emit(StatusEvent::Retrying {
                            attempt,
                            max: max_attempts,
                            timestamp_unix_ms: unix_ms(),
                        });
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                    }
                }
            }
        }

        self.set_state(&cancel, LifecycleState::Failed).await;
    }

    /// Background task: mark the session failed when the encoder dies for
    /// good.
    ///
    /// The supervisor emits a terminal `Error` only after it has cleared
    /// the running flag, so an `Error` event with no running encoder means
    /// the restart budget is exhausted. Classified stderr error lines
    /// arrive while the encoder still runs and pass through untouched.
    async fn watch_encoder_terminal(
        &self,
        mut rx: tokio::sync::broadcast::Receiver<StatusEvent>,
        cancel: CancellationToken,
    ) {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Ok(StatusEvent::Error { .. }) => {
                        if !self.supervisor.status().await.running {
                            self.set_state(&cancel, LifecycleState::Failed).await;
                            return;
                        }
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                },
            }
        }
    }

    /// Write the session state unless the session was cancelled meanwhile
    /// or has already reached a terminal state.
    ///
    /// `Failed` and `Ended` are exited only through `stop`; a watcher whose
    /// in-flight remote call completes after the session failed must not
    /// resurrect it.
    async fn set_state(&self, cancel: &CancellationToken, state: LifecycleState) {
        if cancel.is_cancelled() {
            return;
        }
        let mut session = self.session.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        if matches!(
            session.state,
            LifecycleState::Failed | LifecycleState::Ended
        ) {
            return;
        }
        info!(session_id = %session.id, %state, "session state");
        session.state = state;
    }

    async fn discard_staged(&self, staged: Option<PathBuf>) {
        if let Some(path) = staged {
            if let Err(e) = self.staging.remove(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove staged file");
            }
        }
    }
}
