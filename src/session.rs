//! Suspend/resume storage for request contexts.
//!
//! Each `save` serializes the whole context into a single snapshot under a
//! fresh handle, so a resumed request observes every mutation made before
//! suspension or none of them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::{RequestContext, SessionHandle};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} expired")]
    Expired(String),
    #[error("failed to serialize session: {0}")]
    Serialize(String),
}

#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Persist a snapshot and return its handle.
    ///
    /// # Errors
    /// Returns `StoreError` if the context cannot be stored.
    async fn save(&self, ctx: &RequestContext) -> Result<SessionHandle, StoreError>;

    /// Load the snapshot behind a handle.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` or `StoreError::Expired`.
    async fn load(&self, handle: &SessionHandle) -> Result<RequestContext, StoreError>;

    /// Drop a snapshot. Unknown handles are ignored.
    async fn discard(&self, handle: &SessionHandle);
}

struct Snapshot {
    payload: String,
    created_at: Instant,
}

/// In-process store with a fixed time to live.
pub struct MemorySessionStore {
    ttl: Duration,
    snapshots: Mutex<HashMap<SessionHandle, Snapshot>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

#[async_trait]
impl SessionStateStore for MemorySessionStore {
    async fn save(&self, ctx: &RequestContext) -> Result<SessionHandle, StoreError> {
        let payload =
            serde_json::to_string(ctx).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let handle = SessionHandle::generate();

        let mut snapshots = self.snapshots.lock().await;
        snapshots.retain(|_, snapshot| snapshot.created_at.elapsed() < self.ttl);
        snapshots.insert(
            handle.clone(),
            Snapshot {
                payload,
                created_at: Instant::now(),
            },
        );
        debug!("stored session {handle}");
        Ok(handle)
    }

    async fn load(&self, handle: &SessionHandle) -> Result<RequestContext, StoreError> {
        let mut snapshots = self.snapshots.lock().await;
        let Some(snapshot) = snapshots.get(handle) else {
            return Err(StoreError::NotFound(handle.to_string()));
        };
        if snapshot.created_at.elapsed() >= self.ttl {
            snapshots.remove(handle);
            return Err(StoreError::Expired(handle.to_string()));
        }
        serde_json::from_str(&snapshot.payload).map_err(|e| StoreError::Serialize(e.to_string()))
    }

    async fn discard(&self, handle: &SessionHandle) {
        if self.snapshots.lock().await.remove(handle).is_some() {
            debug!("discarded session {handle}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FlowStep;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = MemorySessionStore::default();
        let mut ctx = RequestContext::new("10.0.0.1", "sp-a").with_attribute("uid", ["alice"]);
        ctx.gate.step = Some(FlowStep::ChallengeResponse);

        let handle = store.save(&ctx).await.unwrap_or_else(|e| panic!("{e}"));
        let loaded = store.load(&handle).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(loaded, ctx);
    }

    #[tokio::test]
    async fn each_save_gets_a_new_handle() {
        let store = MemorySessionStore::default();
        let ctx = RequestContext::default();
        let first = store.save(&ctx).await.unwrap_or_else(|e| panic!("{e}"));
        let second = store.save(&ctx).await.unwrap_or_else(|e| panic!("{e}"));
        assert_ne!(first, second);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_mutation() {
        let store = MemorySessionStore::default();
        let mut ctx = RequestContext::new("10.0.0.1", "sp-a");
        let handle = store.save(&ctx).await.unwrap_or_else(|e| panic!("{e}"));

        ctx.set_flag("mfagate", "enabled", false);
        let loaded = store.load(&handle).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(loaded.flag("mfagate", "enabled"), None);
    }

    #[tokio::test]
    async fn unknown_handle_is_not_found() {
        let store = MemorySessionStore::default();
        let err = store.load(&SessionHandle::from("missing")).await.err();
        assert_eq!(err, Some(StoreError::NotFound("missing".to_string())));
    }

    #[tokio::test]
    async fn expired_snapshot_is_rejected_and_dropped() {
        let store = MemorySessionStore::new(Duration::from_millis(10));
        let handle = store
            .save(&RequestContext::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = store.load(&handle).await.err();
        assert_eq!(err, Some(StoreError::Expired(handle.to_string())));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn discard_removes_snapshot() {
        let store = MemorySessionStore::default();
        let handle = store
            .save(&RequestContext::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        store.discard(&handle).await;
        store.discard(&handle).await;
        assert!(store.load(&handle).await.is_err());
    }
}
