//! Loopcast daemon
//!
//! Background service that pushes a looping local video into a remote live
//! broadcast: supervises the ffmpeg subprocess, reconciles the remote
//! broadcast lifecycle, and exposes session control over HTTP.

pub mod api;
pub mod classify;
pub mod coordinator;
pub mod daemon;
pub mod encode;
pub mod events;
pub mod platform;
pub mod staging;
pub mod startup;
pub mod supervisor;

pub use api::{create_router, run_server, AppState, ServerError};
pub use classify::{classify_line, LineClass};
pub use coordinator::{
    Coordinator, CoordinatorError, LifecycleState, SessionStatus, StartSessionRequest,
    StartedSession,
};
pub use daemon::{Daemon, DaemonError};
pub use encode::{build_ffmpeg_args, extract_thumbnail, EncodeError, PipelineSpec};
pub use events::{unix_ms, EventBus, StatusEvent};
pub use loopcast_config as config;
pub use loopcast_config::Config;
pub use platform::{
    BroadcastPlatform, BroadcastRequest, BroadcastSummary, Category, DryRunPlatform,
    PlatformError, Provisioned, RemoteLifecycle,
};
pub use staging::Staging;
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, StartupError};
pub use supervisor::{EncoderStatus, Supervisor, SupervisorError};
