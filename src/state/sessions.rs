use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::core::bridge::SessionHandle;

/// Live sessions, keyed by session id.
///
/// Every session token is a child of one shutdown token, so stopping the
/// registry stops every session. Session tasks are spawned on the tracker
/// so shutdown can wait for them to drain.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionHandle>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a new session, cancelled with the registry.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tasks
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id().to_string(), handle);
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every live session and refuse new ones.
    pub fn stop_all(&self) {
        info!(active = self.sessions.len(), "Stopping all sessions");
        self.shutdown.cancel();
        self.tasks.close();
    }

    /// Wait for tracked session tasks to finish. Returns `false` on timeout.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.tasks.wait()).await.is_ok()
    }
}
