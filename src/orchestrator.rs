//! Mutation orchestration.
//!
//! Translates user intents (add/toggle/edit/reprioritize/delete) into
//! gateway calls plus an immediate optimistic update to the local cache,
//! then reconciles: confirmed rows replace placeholders, failures revert
//! the cache to its pre-mutation state. Every mutation holds a
//! `PendingMutation` for its task id while the call is in flight; the
//! notification dispatcher uses that window to suppress feed echoes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Error, Result, StoreError};
use crate::gateway::StoreGateway;
use crate::notify::{ChangeSource, NotificationDispatcher};
use crate::session::SharedState;
use crate::task::{ChangeEvent, NewTask, Priority, Task, TaskPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Toggle,
    Edit,
    Reprioritize,
    Delete,
}

/// Bookkeeping for a mutation in flight.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub local_id: Uuid,
    pub kind: MutationKind,
    pub submitted_at: DateTime<Utc>,
    /// Title fingerprint for creates: the insert echo arrives under the
    /// store-assigned id, so it cannot be matched by placeholder id.
    title: Option<String>,
}

/// In-flight mutations keyed by affected task id (placeholder id for
/// creates).
#[derive(Debug, Default)]
pub struct PendingMutations {
    by_task: HashMap<String, PendingMutation>,
}

impl PendingMutations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutation dispatch. Returns a token that must be passed
    /// back to [`clear`](Self::clear) so a resolution cannot drop a newer
    /// pending entry for the same id.
    pub fn begin(&mut self, task_id: &str, kind: MutationKind) -> Uuid {
        let local_id = Uuid::new_v4();
        self.by_task.insert(
            task_id.to_string(),
            PendingMutation {
                local_id,
                kind,
                submitted_at: Utc::now(),
                title: None,
            },
        );
        local_id
    }

    pub fn begin_create(&mut self, placeholder_id: &str, title: &str) -> Uuid {
        let local_id = Uuid::new_v4();
        self.by_task.insert(
            placeholder_id.to_string(),
            PendingMutation {
                local_id,
                kind: MutationKind::Create,
                submitted_at: Utc::now(),
                title: Some(title.to_string()),
            },
        );
        local_id
    }

    /// Clear the entry for `task_id` if it still belongs to `token`.
    pub fn clear(&mut self, task_id: &str, token: Uuid) {
        if let Some(pending) = self.by_task.get(task_id) {
            if pending.local_id == token {
                self.by_task.remove(task_id);
            }
        }
    }

    /// Whether a feed event overlaps a mutation from this session.
    ///
    /// Updates and deletes match by id. Inserts match a pending create by
    /// title fingerprint, since the echo carries the store-assigned id.
    pub fn overlaps(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Insert { after } => {
                self.by_task.contains_key(&after.id)
                    || self.by_task.values().any(|pending| {
                        pending.kind == MutationKind::Create
                            && pending.title.as_deref() == Some(after.title.as_str())
                    })
            }
            ChangeEvent::Update { after, .. } => self.by_task.contains_key(&after.id),
            ChangeEvent::Delete { before } => self.by_task.contains_key(&before.id),
        }
    }

    pub fn len(&self) -> usize {
        self.by_task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_task.is_empty()
    }
}

/// Issues store mutations with optimistic cache updates and full revert
/// on failure.
pub struct MutationOrchestrator {
    gateway: Arc<dyn StoreGateway>,
    state: SharedState,
    dispatcher: Arc<NotificationDispatcher>,
    owner_id: String,
    config: StoreConfig,
}

impl MutationOrchestrator {
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

    /// Create a task. The placeholder appears in the cache immediately
    /// and is swapped for the confirmed row, correlated by the temporary
    /// id rather than the server id.
    pub async fn add_task(&self, title: &str, priority: Option<Priority>) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        let priority = priority.unwrap_or_default();

        let placeholder = Task::placeholder(title, priority, &self.owner_id);
        let placeholder_id = placeholder.id.clone();
        let token = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            state.cache.insert(placeholder);
            state.pending.begin_create(&placeholder_id, title)
        };

        let new = NewTask {
            title: title.to_string(),
            owner_id: self.owner_id.clone(),
            priority: Some(priority),
        };
        match self.call_store(|| self.gateway.create(new.clone())).await {
            Ok(confirmed) => {
                {
                    let mut state = self.state.lock();
                    // The feed echo may have inserted the confirmed row
                    // already; remove-then-insert converges either way.
                    state.cache.remove(&placeholder_id);
                    state.cache.insert(confirmed.clone());
                }
                let event = ChangeEvent::Insert {
                    after: confirmed.clone(),
                };
                self.dispatcher
                    .dispatch(&event, ChangeSource::LocalMutation)
                    .await;
                self.state.lock().pending.clear(&placeholder_id, token);
                Ok(confirmed)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.cache.remove(&placeholder_id);
                state.pending.clear(&placeholder_id, token);
                drop(state);
                warn!("failed to add task: {err}");
                Err(err)
            }
        }
    }

    /// Flip completion state.
    pub async fn toggle_task(&self, id: &str) -> Result<Task> {
        self.update_task(id, MutationKind::Toggle, |current| {
            TaskPatch::completion(!current.is_complete)
        })
        .await
    }

    /// Rename a task; the new title must be non-empty.
    pub async fn rename_task(&self, id: &str, title: &str) -> Result<Task> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        self.update_task(id, MutationKind::Edit, move |_| TaskPatch::title(title))
            .await
    }

    pub async fn set_priority(&self, id: &str, priority: Priority) -> Result<Task> {
        self.update_task(id, MutationKind::Reprioritize, move |_| {
            TaskPatch::priority(priority)
        })
        .await
    }

    /// Remove a task; the cache entry disappears immediately and is
    /// restored if the store call fails.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let (snapshot, token) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            let snapshot = state
                .cache
                .snapshot(id)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown task: {id}")))?;
            state.cache.remove(id);
            let token = state.pending.begin(id, MutationKind::Delete);
            (snapshot, token)
        };

        match self.call_store(|| self.gateway.delete(id)).await {
            Ok(()) => {
                let event = ChangeEvent::Delete { before: snapshot };
                self.dispatcher
                    .dispatch(&event, ChangeSource::LocalMutation)
                    .await;
                self.state.lock().pending.clear(id, token);
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.cache.insert(snapshot);
                state.pending.clear(id, token);
                drop(state);
                warn!("failed to delete task {id}: {err}");
                Err(err)
            }
        }
    }

    /// Shared optimistic-update path for toggle/edit/reprioritize: apply
    /// the patched value to the cache, call the store, revert to the
    /// retained snapshot on failure.
    async fn update_task(
        &self,
        id: &str,
        kind: MutationKind,
        make_patch: impl FnOnce(&Task) -> TaskPatch,
    ) -> Result<Task> {
        let (snapshot, patch, token) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            let snapshot = state
                .cache
                .snapshot(id)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown task: {id}")))?;
            let patch = make_patch(&snapshot);
            state.cache.replace(patch.apply_to(&snapshot));
            let token = state.pending.begin(id, kind);
            (snapshot, patch, token)
        };

        match self.call_store(|| self.gateway.update(id, patch.clone())).await {
            Ok(confirmed) => {
                self.state.lock().cache.replace(confirmed.clone());
                let event = ChangeEvent::Update {
                    before: Some(snapshot),
                    after: confirmed.clone(),
                };
                self.dispatcher
                    .dispatch(&event, ChangeSource::LocalMutation)
                    .await;
                self.state.lock().pending.clear(id, token);
                Ok(confirmed)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.cache.replace(snapshot);
                state.pending.clear(id, token);
                drop(state);
                warn!("failed to update task {id}: {err}");
                Err(err)
            }
        }
    }

    /// Run a store call under the configured deadline, retrying retryable
    /// failures a bounded number of times.
    async fn call_store<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.timeout(), operation()).await;
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => StoreError::timeout("store call exceeded deadline"),
            };
            if err.retryable() && attempt < self.config.max_retries {
                attempt += 1;
                debug!("retrying store call (attempt {attempt}): {err}");
                tokio::time::sleep(self.config.retry_delay()).await;
                continue;
            }
            return Err(err.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            is_complete: false,
            priority: Priority::Medium,
            owner_id: "owner-1".to_string(),
            created_at: Utc.timestamp_opt(100, 0).unwrap(),
        }
    }

    #[test]
    fn pending_update_overlaps_by_id() {
        let mut pending = PendingMutations::new();
        let token = pending.begin("t1", MutationKind::Toggle);

        let event = ChangeEvent::Update {
            before: None,
            after: task("t1", "Buy milk"),
        };
        assert!(pending.overlaps(&event));

        pending.clear("t1", token);
        assert!(!pending.overlaps(&event));
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_create_overlaps_insert_by_title() {
        let mut pending = PendingMutations::new();
        pending.begin_create("local-abc", "Buy milk");

        let echo = ChangeEvent::Insert {
            after: task("t1", "Buy milk"),
        };
        let remote = ChangeEvent::Insert {
            after: task("t2", "Walk dog"),
        };
        assert!(pending.overlaps(&echo));
        assert!(!pending.overlaps(&remote));
    }

    #[test]
    fn clear_with_stale_token_keeps_newer_entry() {
        let mut pending = PendingMutations::new();
        let first = pending.begin("t1", MutationKind::Toggle);
        let _second = pending.begin("t1", MutationKind::Edit);

        pending.clear("t1", first);
        assert_eq!(pending.len(), 1);
    }
}
