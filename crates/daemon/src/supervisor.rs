//! Encoder process supervisor.
//!
//! Owns at most one ffmpeg child at a time. Spawns it with stderr piped,
//! forwards every stderr line to the event bus (raw plus its semantic
//! class), and restarts crashed children up to a configured bound with a
//! fixed backoff between attempts.
//!
//! A requested stop must never be followed by a restart. Each run carries a
//! `CancellationToken` created at `start` and cancelled by `stop`; the
//! monitor checks it after every exit and while sleeping out the backoff,
//! so the crash-restart path and the stop path cannot race.

use crate::classify::{classify_line, LineClass};
use crate::encode::{build_ffmpeg_args, PipelineSpec};
use crate::events::{unix_ms, EventBus, StatusEvent};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a stopped encoder gets to exit on SIGINT before the hard kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// An encoder is already active
    #[error("An encoder process is already running")]
    AlreadyRunning,

    /// Spawning the encoder process failed
    #[error("Failed to spawn encoder process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Snapshot of the supervisor's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderStatus {
    pub running: bool,
    pub retry_count: u32,
    pub max_retry: u32,
    pub pid: Option<u32>,
}

/// Mutable handle state. The supervisor is the sole mutator; `stop` only
/// flips `running` and cancels the run token.
#[derive(Debug, Default)]
struct EncoderHandle {
    running: bool,
    retry_count: u32,
    max_retry: u32,
    pid: Option<u32>,
    cancel: Option<CancellationToken>,
}

/// Supervises a single encoder subprocess.
#[derive(Clone)]
pub struct Supervisor {
    binary: String,
    restart_backoff: Duration,
    bus: EventBus,
    handle: Arc<Mutex<EncoderHandle>>,
}

impl Supervisor {
    pub fn new(binary: String, restart_backoff: Duration, bus: EventBus) -> Self {
        Self {
            binary,
            restart_backoff,
            bus,
            handle: Arc::new(Mutex::new(EncoderHandle::default())),
        }
    }

    /// Start the encoder for the given pipeline spec.
    ///
    /// Spawn failures surface synchronously to the caller. On success a
    /// `Started` event is emitted before this returns and a monitor task
    /// takes over the child.
    pub async fn start(&self, spec: PipelineSpec) -> Result<(), SupervisorError> {
        let mut handle = self.handle.lock().await;
        if handle.running {
            return Err(SupervisorError::AlreadyRunning);
        }

        let mut child = spawn_child(&self.binary, &spec)?;
        let pid = child.id();
        let cancel = CancellationToken::new();

        handle.running = true;
        handle.retry_count = 0;
        handle.max_retry = spec.max_restarts;
        handle.pid = pid;
        handle.cancel = Some(cancel.clone());
        drop(handle);

        info!(pid = ?pid, source = %spec.source_path.display(), "encoder started");
        self.bus.emit(StatusEvent::Started {
            pid,
            timestamp_unix_ms: unix_ms(),
        });

        self.spawn_stderr_forwarder(&mut child);

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run_loop(child, spec, cancel).await;
        });

        Ok(())
    }

    /// Request a stop.
    ///
    /// Returns `false` if no encoder is active. Otherwise cancels the run
    /// token (the monitor kills the child and skips any pending restart),
    /// marks the handle not running, and returns `true`.
    pub async fn stop(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if !handle.running {
            return false;
        }

        if let Some(cancel) = handle.cancel.take() {
            cancel.cancel();
        }
        handle.running = false;
        handle.pid = None;
        info!("encoder stop requested");
        true
    }

    /// Current state snapshot.
    pub async fn status(&self) -> EncoderStatus {
        let handle = self.handle.lock().await;
        EncoderStatus {
            running: handle.running,
            retry_count: handle.retry_count,
            max_retry: handle.max_retry,
            pid: handle.pid,
        }
    }

    /// Monitor loop for one session: wait for exits and drive restarts.
    async fn run_loop(self, mut child: Child, spec: PipelineSpec, cancel: CancellationToken) {
        loop {
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => {
                    // SIGINT lets ffmpeg flush its container trailer. If the
                    // child ignores it, escalate to SIGKILL after the grace
                    // period. The child may already be gone in either step.
                    if let Some(pid) = child.id() {
                        unsafe { libc::kill(pid as i32, libc::SIGINT) };
                    }
                    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                        warn!("encoder ignored SIGINT, killing");
                        if let Err(e) = child.start_kill() {
                            debug!(error = %e, "kill after stop request failed");
                        }
                    }
                    true
                }
                _ = child.wait() => false,
            };

            // wait() is idempotent and reaps the child in both branches.
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(error = %e, "failed to collect encoder exit status");
                    None
                }
            };

            info!(exit_code = ?exit_code, cancelled, "encoder exited");
            self.bus.emit(StatusEvent::Stopped {
                exit_code,
                timestamp_unix_ms: unix_ms(),
            });

            if cancelled {
                let mut handle = self.handle.lock().await;
                handle.running = false;
                handle.pid = None;
                return;
            }

            // Crash path: decide between restart and terminal error.
            let attempt = {
                let mut handle = self.handle.lock().await;
                if !handle.running {
                    // stop() won the race between exit and this check
                    return;
                }
                if handle.retry_count >= handle.max_retry {
                    handle.running = false;
                    handle.pid = None;
                    handle.cancel = None;
                    None
                } else {
                    handle.retry_count += 1;
                    Some((handle.retry_count, handle.max_retry))
                }
            };

            let (attempt, max) = match attempt {
                Some(pair) => pair,
                None => {
                    warn!("encoder crashed with restart budget exhausted");
                    self.bus.emit(StatusEvent::Error {
                        message: "Encoder exited and restart attempts are exhausted".to_string(),
                        timestamp_unix_ms: unix_ms(),
                    });
                    return;
                }
            };

            info!(attempt, max, "restarting encoder after crash");
            self.bus.emit(StatusEvent::Retrying {
                attempt,
                max,
                timestamp_unix_ms: unix_ms(),
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    let mut handle = self.handle.lock().await;
                    handle.running = false;
                    handle.pid = None;
                    return;
                }
                _ = tokio::time::sleep(self.restart_backoff) => {}
            }

            // Respawn under the lock so a concurrent stop cannot observe a
            // stale pid.
            let mut handle = self.handle.lock().await;
            if cancel.is_cancelled() || !handle.running {
                handle.running = false;
                handle.pid = None;
                return;
            }

            match spawn_child(&self.binary, &spec) {
                Ok(new_child) => {
                    child = new_child;
                    handle.pid = child.id();
                    let pid = handle.pid;
                    drop(handle);

                    self.bus.emit(StatusEvent::Started {
                        pid,
                        timestamp_unix_ms: unix_ms(),
                    });
                    self.spawn_stderr_forwarder(&mut child);
                }
                Err(e) => {
                    handle.running = false;
                    handle.pid = None;
                    handle.cancel = None;
                    drop(handle);

                    warn!(error = %e, "encoder respawn failed");
                    self.bus.emit(StatusEvent::Error {
                        message: format!("Failed to respawn encoder: {}", e),
                        timestamp_unix_ms: unix_ms(),
                    });
                    return;
                }
            }
        }
    }

    /// Forward the child's stderr to the bus, line by line.
    fn spawn_stderr_forwarder(&self, child: &mut Child) {
        let stderr = match child.stderr.take() {
            Some(stderr) => stderr,
            None => return,
        };

        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                bus.emit(StatusEvent::LogLine {
                    line: line.clone(),
                    timestamp_unix_ms: unix_ms(),
                });

                match classify_line(&line) {
                    Some(LineClass::Encoding) => {
                        bus.emit(StatusEvent::Encoding {
                            message: line,
                            timestamp_unix_ms: unix_ms(),
                        });
                    }
                    Some(LineClass::StreamAccepted) => {
                        bus.emit(StatusEvent::StreamAccepted {
                            message: line,
                            timestamp_unix_ms: unix_ms(),
                        });
                    }
                    Some(LineClass::Error) => {
                        bus.emit(StatusEvent::Error {
                            message: line.trim().to_string(),
                            timestamp_unix_ms: unix_ms(),
                        });
                    }
                    None => {}
                }
            }
        });
    }
}

/// Spawn an encoder child with stderr piped and stdin/stdout discarded.
fn spawn_child(binary: &str, spec: &PipelineSpec) -> std::io::Result<Child> {
    Command::new(binary)
        .args(build_ffmpeg_args(spec))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::broadcast;
    use tokio::time::timeout;

    fn test_spec() -> PipelineSpec {
        PipelineSpec {
            source_path: PathBuf::from("/dev/null"),
            cover_path: None,
            ingest_url: "rtmp://127.0.0.1/live/test".to_string(),
            video_bitrate: "1000k".to_string(),
            audio_bitrate: "64k".to_string(),
            frame_rate: 30,
            loop_source: false,
            max_restarts: 2,
        }
    }

    /// Collect non-LogLine events until the predicate says stop or the
    /// deadline passes.
    async fn collect_events(
        rx: &mut broadcast::Receiver<StatusEvent>,
        count: usize,
        deadline: Duration,
    ) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        let _ = timeout(deadline, async {
            while events.len() < count {
                match rx.recv().await {
                    Ok(StatusEvent::LogLine { .. }) => continue,
                    Ok(event) => events.push(event),
                    Err(_) => break,
                }
            }
        })
        .await;
        events
    }

    // "yes" ignores its arguments and runs until killed; "false" exits 1
    // immediately. Both stand in for ffmpeg without needing it installed.

    #[tokio::test]
    async fn test_start_twice_returns_already_running() {
        let bus = EventBus::new(64);
        let supervisor = Supervisor::new("yes".to_string(), Duration::from_millis(10), bus);

        supervisor.start(test_spec()).await.unwrap();
        let second = supervisor.start(test_spec()).await;
        assert!(matches!(second, Err(SupervisorError::AlreadyRunning)));

        assert!(supervisor.stop().await);
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_synchronously() {
        let bus = EventBus::new(64);
        let supervisor = Supervisor::new(
            "definitely-not-a-real-binary".to_string(),
            Duration::from_millis(10),
            bus,
        );

        let result = supervisor.start(test_spec()).await;
        assert!(matches!(result, Err(SupervisorError::Spawn(_))));

        let status = supervisor.status().await;
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_crash_restart_sequence_is_bounded() {
        let bus = EventBus::new(64);
        let supervisor =
            Supervisor::new("false".to_string(), Duration::from_millis(5), bus.clone());
        let mut rx = bus.subscribe();

        supervisor.start(test_spec()).await.unwrap();

        // max_restarts=2: Started/Stopped/Retrying twice, then a final
        // Started/Stopped/Error.
        let events = collect_events(&mut rx, 9, Duration::from_secs(5)).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "started", "stopped", "retrying", "started", "stopped", "retrying", "started",
                "stopped", "error",
            ]
        );

        // Retry attempts strictly increase toward the bound.
        let attempts: Vec<(u32, u32)> = events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Retrying { attempt, max, .. } => Some((*attempt, *max)),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![(1, 2), (2, 2)]);

        let status = supervisor.status().await;
        assert!(!status.running);
        assert_eq!(status.retry_count, 2);
        assert!(!supervisor.stop().await);
    }

    #[tokio::test]
    async fn test_stop_running_encoder() {
        let bus = EventBus::new(64);
        let supervisor =
            Supervisor::new("yes".to_string(), Duration::from_millis(10), bus.clone());
        let mut rx = bus.subscribe();

        supervisor.start(test_spec()).await.unwrap();
        assert!(supervisor.stop().await);

        let events = collect_events(&mut rx, 2, Duration::from_secs(5)).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["started", "stopped"]);

        // No restart after a requested stop.
        let extra = collect_events(&mut rx, 1, Duration::from_millis(100)).await;
        assert!(extra.is_empty(), "unexpected events after stop: {:?}", extra);

        let status = supervisor.status().await;
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_stop_interrupts_child_without_grace_wait() {
        let bus = EventBus::new(64);
        let supervisor =
            Supervisor::new("yes".to_string(), Duration::from_millis(10), bus.clone());
        let mut rx = bus.subscribe();

        supervisor.start(test_spec()).await.unwrap();
        let begun = std::time::Instant::now();
        assert!(supervisor.stop().await);

        let events = collect_events(&mut rx, 2, Duration::from_secs(4)).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["started", "stopped"]);

        // A signal-responsive child exits on the interrupt itself, well
        // inside the SIGKILL grace window.
        assert!(begun.elapsed() < STOP_GRACE);
    }

    #[tokio::test]
    async fn test_stop_during_backoff_cancels_restart() {
        let bus = EventBus::new(64);
        let supervisor =
            Supervisor::new("false".to_string(), Duration::from_millis(500), bus.clone());
        let mut rx = bus.subscribe();

        let mut spec = test_spec();
        spec.max_restarts = 5;
        supervisor.start(spec).await.unwrap();

        // Wait for the first crash and pending retry, then stop inside the
        // backoff window.
        let events = collect_events(&mut rx, 3, Duration::from_secs(5)).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["started", "stopped", "retrying"]);

        assert!(supervisor.stop().await);

        let extra = collect_events(&mut rx, 1, Duration::from_millis(700)).await;
        assert!(
            !extra.iter().any(|e| e.kind() == "started"),
            "restart fired after stop: {:?}",
            extra
        );

        let status = supervisor.status().await;
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_stop_when_idle_returns_false() {
        let bus = EventBus::new(64);
        let supervisor = Supervisor::new("yes".to_string(), Duration::from_millis(10), bus);
        assert!(!supervisor.stop().await);
    }
}
