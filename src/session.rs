//! Per-user session wiring.
//!
//! A session is the explicitly constructed state container for one
//! signed-in user: the task cache and pending-mutation table behind one
//! lock, the orchestrator and reconciler that mutate them, and the
//! subscription lifetime. There are no module-level globals; everything a
//! session owns is torn down by [`Session::close`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::assist::{AssistClient, SuggestionAssistant};
use crate::cache::TaskCache;
use crate::config::Config;
use crate::error::Result;
use crate::gateway::StoreGateway;
use crate::notify::{NotificationDispatcher, NotificationSender};
use crate::orchestrator::{MutationOrchestrator, PendingMutations};
use crate::reconciler::ChangeFeedReconciler;
use crate::task::{Priority, Task};

/// Mutable state shared by the orchestrator and the reconciler.
///
/// Critical sections are short and never held across an await, so cache
/// mutations from the two paths serialize without interleaving.
pub struct SessionState {
    pub cache: TaskCache,
    pub pending: PendingMutations,
    pub closed: bool,
    /// Set when the reconciler exhausted its re-subscribe attempts.
    pub feed_down: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            cache: TaskCache::new(),
            pending: PendingMutations::new(),
            closed: false,
            feed_down: false,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Arc<Mutex<SessionState>>;

/// Handle to a signed-in user's synchronization core.
pub struct Session {
    state: SharedState,
    orchestrator: MutationOrchestrator,
    assistant: SuggestionAssistant,
    owner_id: String,
    shutdown: Option<oneshot::Sender<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl Session {
    /// Build the session for a signed-in user: subscribe to the change
    /// feed, load the initial task list, and start the feed consumer.
    ///
    /// Subscribing before listing closes the gap window; events committed
    /// in between wait in the subscription buffer and reapply
    /// idempotently on top of the initial load.
    pub async fn sign_in(
        gateway: Arc<dyn StoreGateway>,
        sender: Arc<dyn NotificationSender>,
        assist_client: Arc<dyn AssistClient>,
        config: Config,
        owner_id: impl Into<String>,
    ) -> Result<Self> {
        let owner_id = owner_id.into();

        let subscription = gateway.subscribe(&owner_id).await?;
        let initial = gateway.list_by_owner(&owner_id).await?;
        debug!("loaded {} task(s) for {owner_id}", initial.len());

        let state: SharedState = Arc::new(Mutex::new(SessionState::new()));
        state.lock().cache.replace_all(initial);

        let dispatcher = Arc::new(NotificationDispatcher::new(
            sender,
            config.notify.link_url.clone(),
        ));
        let orchestrator = MutationOrchestrator::new(
            gateway.clone(),
            state.clone(),
            dispatcher.clone(),
            owner_id.clone(),
            config.store.clone(),
        );
        let reconciler = ChangeFeedReconciler::new(
            gateway,
            state.clone(),
            dispatcher,
            owner_id.clone(),
            config.store.clone(),
        );
        let assistant = SuggestionAssistant::new(assist_client, &config.assist);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let consumer = tokio::spawn(reconciler.run(subscription, shutdown_rx));

        Ok(Self {
            state,
            orchestrator,
            assistant,
            owner_id,
            shutdown: Some(shutdown_tx),
            consumer: Some(consumer),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Snapshot of the current task list, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().cache.tasks().to_vec()
    }

    /// Whether the change feed is still alive (or being restored).
    pub fn feed_healthy(&self) -> bool {
        !self.state.lock().feed_down
    }

    pub async fn add_task(&self, title: &str, priority: Option<Priority>) -> Result<Task> {
        self.orchestrator.add_task(title, priority).await
    }

    pub async fn toggle_task(&self, id: &str) -> Result<Task> {
        self.orchestrator.toggle_task(id).await
    }

    pub async fn rename_task(&self, id: &str, title: &str) -> Result<Task> {
        self.orchestrator.rename_task(id, title).await
    }

    pub async fn set_priority(&self, id: &str, priority: Priority) -> Result<Task> {
        self.orchestrator.set_priority(id, priority).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.orchestrator.delete_task(id).await
    }

    pub fn assistant(&self) -> &SuggestionAssistant {
        &self.assistant
    }

    /// Sign out: stop the feed consumer, release the subscription, and
    /// refuse further mutations. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        let already_closed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.closed, true)
        };
        if already_closed {
            return Ok(());
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(consumer) = self.consumer.take() {
            if let Err(err) = consumer.await {
                warn!("feed consumer ended abnormally: {err}");
            }
        }
        debug!("session for {} closed", self.owner_id);
        Ok(())
    }

    /// Guard for callers that held on to a closed handle.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort teardown when close() was never awaited.
        self.state.lock().closed = true;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
