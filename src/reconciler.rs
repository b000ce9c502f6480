//! Change-feed reconciliation.
//!
//! The reconciler is the sole consumer of the store subscription for a
//! signed-in user. Events are merged into the cache through its
//! idempotent mutators, then forwarded to the notification dispatcher
//! with a flag marking overlap with an in-flight mutation from this
//! session. If the feed ends without an explicit shutdown, the reconciler
//! re-subscribes and rebuilds the cache from a full list; incremental
//! application resumes afterwards.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::gateway::{StoreGateway, Subscription};
use crate::notify::{ChangeSource, NotificationDispatcher};
use crate::session::SharedState;
use crate::task::ChangeEvent;

pub struct ChangeFeedReconciler {
    gateway: Arc<dyn StoreGateway>,
    state: SharedState,
    dispatcher: Arc<NotificationDispatcher>,
    owner_id: String,
    config: StoreConfig,
}

impl ChangeFeedReconciler {
    pub fn new(
        gateway: Arc<dyn StoreGateway>,
        state: SharedState,
        dispatcher: Arc<NotificationDispatcher>,
        owner_id: String,
        config: StoreConfig,
    ) -> Self {
        Self {
            gateway,
            state,
            dispatcher,
            owner_id,
            config,
        }
    }

    /// Consume the feed until the shutdown signal fires.
    pub async fn run(self, mut subscription: Subscription, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    subscription.close();
                    debug!("change feed consumer for {} shut down", self.owner_id);
                    return;
                }
                event = subscription.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        warn!("change feed for {} disconnected", self.owner_id);
                        match self.reconnect().await {
                            Some(fresh) => subscription = fresh,
                            None => {
                                error!(
                                    "change feed for {} could not be restored",
                                    self.owner_id
                                );
                                self.state.lock().feed_down = true;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Merge one event into the cache and hand it to the dispatcher.
    async fn apply(&self, event: ChangeEvent) {
        let echo = {
            let mut state = self.state.lock();
            let echo = state.pending.overlaps(&event);
            match &event {
                ChangeEvent::Insert { after } => state.cache.insert(after.clone()),
                ChangeEvent::Update { after, .. } => state.cache.replace(after.clone()),
                ChangeEvent::Delete { before } => state.cache.remove(&before.id),
            }
            echo
        };
        debug!(
            "applied {} for {} (echo: {echo})",
            event.kind_name(),
            event.task_id()
        );
        self.dispatcher
            .dispatch(&event, ChangeSource::Feed { echo })
            .await;
    }

    /// Re-subscribe and resync, bounded per disconnect incident.
    ///
    /// Subscribing before listing closes the gap window: anything
    /// committed between the two lands in the fresh subscription buffer
    /// and reapplies idempotently on top of the resynced cache.
    async fn reconnect(&self) -> Option<Subscription> {
        for attempt in 1..=self.config.max_resubscribe_attempts {
            tokio::time::sleep(self.config.resubscribe_delay()).await;
            let mut subscription = match self.gateway.subscribe(&self.owner_id).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    warn!("re-subscribe attempt {attempt} failed: {err}");
                    continue;
                }
            };
            match self.resync().await {
                Ok(()) => {
                    info!(
                        "change feed for {} restored after {attempt} attempt(s)",
                        self.owner_id
                    );
                    return Some(subscription);
                }
                Err(err) => {
                    warn!("resync attempt {attempt} failed: {err}");
                    subscription.close();
                }
            }
        }
        None
    }

    /// Rebuild the cache from a full owner list. The only point where
    /// wholesale replacement is acceptable; incremental application is
    /// preferred during normal operation.
    async fn resync(&self) -> Result<(), StoreError> {
        let tasks = self.gateway.list_by_owner(&self.owner_id).await?;
        self.state.lock().cache.replace_all(tasks);
        Ok(())
    }
}
