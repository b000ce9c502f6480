//! Remote store gateway.
//!
//! Capability interface over the external task store: CRUD by owner plus a
//! change-feed subscription. The subscription delivers every committed
//! change to rows matching the owner filter, in commit order, including
//! changes caused by the subscriber's own mutations. Callers must not
//! assume self-originated changes are excluded.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::StoreError;
use crate::task::{ChangeEvent, NewTask, Task, TaskPatch};

/// Channel capacity for change-feed subscriptions.
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// A live change-feed subscription.
///
/// Events arrive through [`recv`](Subscription::recv); the stream ending
/// without [`close`](Subscription::close) having been called signals a
/// disconnect. The consumer owns retry policy; the gateway only hands out
/// fresh subscriptions.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    /// Next committed change, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Release the feed. Idempotent; the producer side stops and the
    /// stream drains.
    pub fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.events.close();
    }

    /// Whether `close` has been called on this handle.
    pub fn is_closed(&self) -> bool {
        self.stop.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pair of (consumer handle, producer ends) for building subscriptions.
///
/// Gateway implementations feed events through the sender until the stop
/// signal fires.
pub fn subscription_channel() -> (Subscription, mpsc::Sender<ChangeEvent>, oneshot::Receiver<()>) {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let (stop_tx, stop_rx) = oneshot::channel();
    (Subscription::new(rx, stop_tx), tx, stop_rx)
}

/// Operations the synchronization core needs from the backing store.
///
/// Every call may fail with a [`StoreError`] carrying a
/// retryable/terminal classification.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Tasks owned by `owner_id`, ordered `created_at` descending.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Persist a new task; the store assigns `id` and `created_at`.
    async fn create(&self, new: NewTask) -> Result<Task, StoreError>;

    /// Apply a partial patch by id, returning the updated row.
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, StoreError>;

    /// Remove a row by id.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Open a change-feed subscription scoped to one owner.
    async fn subscribe(&self, owner_id: &str) -> Result<Subscription, StoreError>;
}
