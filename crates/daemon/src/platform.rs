//! Remote broadcast platform capability.
//!
//! The wire format of the platform stays abstract: the coordinator talks to
//! a `BroadcastPlatform` trait object. The crate ships a `DryRunPlatform`
//! so the daemon runs end-to-end against any plain RTMP sink without a
//! concrete integration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Error type for platform operations
#[derive(Debug, Error)]
pub enum PlatformError {
    /// A request to the platform failed
    #[error("Platform request failed: {0}")]
    Request(String),

    /// The broadcast is not in a state that allows the transition
    #[error("Broadcast precondition unmet: {0}")]
    PreconditionUnmet(String),

    /// The referenced broadcast does not exist
    #[error("Unknown broadcast: {0}")]
    UnknownBroadcast(String),
}

/// Remote broadcast lifecycle as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteLifecycle {
    NotReady,
    Ready,
    Live,
    Complete,
}

impl std::fmt::Display for RemoteLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteLifecycle::NotReady => write!(f, "not-ready"),
            RemoteLifecycle::Ready => write!(f, "ready"),
            RemoteLifecycle::Live => write!(f, "live"),
            RemoteLifecycle::Complete => write!(f, "complete"),
        }
    }
}

impl std::str::FromStr for RemoteLifecycle {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-ready" => Ok(RemoteLifecycle::NotReady),
            "ready" => Ok(RemoteLifecycle::Ready),
            "live" => Ok(RemoteLifecycle::Live),
            "complete" => Ok(RemoteLifecycle::Complete),
            other => Err(PlatformError::Request(format!(
                "Unknown lifecycle state: {}",
                other
            ))),
        }
    }
}

/// Parameters for provisioning a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub description: String,
    pub privacy: String,
    pub category: String,
}

/// Result of provisioning: a broadcast bound to an ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provisioned {
    pub broadcast_id: String,
    pub ingest_id: String,
    pub ingest_url: String,
}

/// Summary of an existing broadcast, for read-only listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSummary {
    pub broadcast_id: String,
    pub title: String,
    pub lifecycle: RemoteLifecycle,
}

/// A content category offered by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
}

/// Capability surface of a remote live-broadcast platform.
#[async_trait]
pub trait BroadcastPlatform: Send + Sync {
    /// Create a broadcast and an ingest endpoint for it.
    async fn create_ingest_and_broadcast(
        &self,
        request: &BroadcastRequest,
    ) -> Result<Provisioned, PlatformError>;

    /// Bind the ingest endpoint to the broadcast.
    async fn bind_ingest(&self, broadcast_id: &str, ingest_id: &str) -> Result<(), PlatformError>;

    /// Attach a thumbnail image to the broadcast.
    async fn set_thumbnail(&self, broadcast_id: &str, image: &Path) -> Result<(), PlatformError>;

    /// Report the broadcast's current lifecycle state.
    async fn poll_broadcast_state(
        &self,
        broadcast_id: &str,
    ) -> Result<RemoteLifecycle, PlatformError>;

    /// Force the broadcast into the target lifecycle state.
    async fn transition_broadcast(
        &self,
        broadcast_id: &str,
        target: RemoteLifecycle,
    ) -> Result<(), PlatformError>;

    /// List the account's broadcasts.
    async fn list_broadcasts(&self) -> Result<Vec<BroadcastSummary>, PlatformError>;

    /// List the platform's content categories.
    async fn list_categories(&self) -> Result<Vec<Category>, PlatformError>;
}

/// A platform stand-in that accepts everything.
///
/// Hands out synthetic broadcast ids, reports `Ready` on poll, and accepts
/// any transition. Lets the daemon stream to a fixed ingest URL with no
/// remote account.
pub struct DryRunPlatform {
    ingest_url: String,
    counter: AtomicU64,
}

impl DryRunPlatform {
    pub fn new(ingest_url: String) -> Self {
        Self {
            ingest_url,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BroadcastPlatform for DryRunPlatform {
    async fn create_ingest_and_broadcast(
        &self,
        _request: &BroadcastRequest,
    ) -> Result<Provisioned, PlatformError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(Provisioned {
            broadcast_id: format!("dry-run-broadcast-{}", n),
            ingest_id: format!("dry-run-ingest-{}", n),
            ingest_url: self.ingest_url.clone(),
        })
    }

    async fn bind_ingest(&self, _broadcast_id: &str, _ingest_id: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn set_thumbnail(&self, _broadcast_id: &str, _image: &Path) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn poll_broadcast_state(
        &self,
        _broadcast_id: &str,
    ) -> Result<RemoteLifecycle, PlatformError> {
        Ok(RemoteLifecycle::Ready)
    }

    async fn transition_broadcast(
        &self,
        _broadcast_id: &str,
        _target: RemoteLifecycle,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn list_broadcasts(&self) -> Result<Vec<BroadcastSummary>, PlatformError> {
        Ok(Vec::new())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, PlatformError> {
        Ok(Vec::new())
    }
}
