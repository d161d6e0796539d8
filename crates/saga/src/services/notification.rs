//! Notification dispatch trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::UserId;

use crate::error::SagaError;

/// An outbound user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient_id: UserId,
    pub title: String,
    pub message: String,
    /// Identifier of the offer or exchange the notification refers to.
    pub reference_id: String,
}

impl Notification {
    pub fn new(
        recipient_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            title: title.into(),
            message: message.into(),
            reference_id: reference_id.into(),
        }
    }
}

/// Trait for the outbound notification queue.
///
/// Delivery is fire-and-forget with at-least-once semantics and no
/// ordering guarantee. Services never let an enqueue failure escalate.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Enqueues a notification for delivery.
    async fn enqueue(&self, notification: Notification) -> Result<(), SagaError>;
}

/// Enqueues best-effort: failures are logged and swallowed.
pub(crate) async fn notify_best_effort<N: Notifier>(notifier: &N, notification: Notification) {
    let recipient_id = notification.recipient_id;
    if let Err(e) = notifier.enqueue(notification).await {
        tracing::warn!(%recipient_id, error = %e, "failed to enqueue notification");
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_enqueue: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every enqueue call.
    pub fn set_fail_on_enqueue(&self, fail: bool) {
        self.state.write().unwrap().fail_on_enqueue = fail;
    }

    /// Returns the number of enqueued notifications.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }

    /// Returns the notifications enqueued for a recipient.
    pub fn sent_to(&self, recipient_id: UserId) -> Vec<Notification> {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn enqueue(&self, notification: Notification) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_enqueue {
            return Err(SagaError::Notification("queue unavailable".to_string()));
        }

        state.sent.push(notification);
        Ok(())
    }
}
