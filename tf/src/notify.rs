//! Owner notification seam
//!
//! The fabric promises that a task's owner always hears *something* when
//! an operation times out or fails. Whatever surface delivers the message
//! implements [`Notifier`]; every invocation is best-effort and an error
//! from it is logged, never propagated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Identifies who to notify about a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskOwner {
    pub chat_id: i64,
    pub user_id: i64,
}

impl TaskOwner {
    pub fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }
}

impl std::fmt::Display for TaskOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

/// Delivers user-facing feedback for the fabric
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to the owner
    async fn notify(&self, owner: &TaskOwner, message: &str) -> eyre::Result<()>;

    /// Remove an in-flight progress notice (e.g. a "processing..."
    /// message) by id; default is a no-op
    async fn discard_notice(&self, _owner: &TaskOwner, _notice_id: i64) -> eyre::Result<()> {
        Ok(())
    }
}

/// Notifier that only logs; useful for embedding without a chat surface
/// and as a test double
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: &TaskOwner, message: &str) -> eyre::Result<()> {
        info!(%owner, message, "Owner notification");
        Ok(())
    }
}

/// Invoke a notifier, swallowing any error it raises
pub(crate) async fn notify_best_effort(notifier: &dyn Notifier, owner: &TaskOwner, message: &str) {
    if let Err(e) = notifier.notify(owner, message).await {
        warn!(%owner, error = %e, "Notifier failed, message dropped");
    }
}

/// Discard an in-flight notice, swallowing any error
pub(crate) async fn discard_notice_best_effort(notifier: &dyn Notifier, owner: &TaskOwner, notice_id: i64) {
    if let Err(e) = notifier.discard_notice(owner, notice_id).await {
        warn!(%owner, notice_id, error = %e, "Failed to discard progress notice");
    }
}
