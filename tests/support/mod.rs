use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tasksync::assist::{AssistClient, GroupingTask, Timeframe};
use tasksync::config::Config;
use tasksync::error::{Result, StoreError};
use tasksync::gateway::{subscription_channel, StoreGateway, Subscription};
use tasksync::notify::{DeliveryError, Notification, NotificationSender};
use tasksync::task::{ChangeEvent, NewTask, Task, TaskPatch};
use tasksync::Priority;

pub const OWNER: &str = "owner-1";

/// Tracing is opt-in via RUST_LOG; repeated calls are harmless.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Test configuration with short deadlines and delays.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.store.timeout_ms = 1_000;
    config.store.retry_delay_ms = 5;
    config.store.resubscribe_delay_ms = 10;
    config.store.max_resubscribe_attempts = 5;
    config
}

/// Poll until `condition` holds or a deadline passes.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within deadline");
}

struct MemoryInner {
    rows: Vec<Task>,
    next_id: u64,
    next_ts: i64,
    subscribers: Vec<(String, mpsc::Sender<ChangeEvent>)>,
    fail_create: VecDeque<StoreError>,
    fail_update: VecDeque<StoreError>,
    fail_delete: VecDeque<StoreError>,
    fail_subscribe: VecDeque<StoreError>,
    hold_resolutions: bool,
}

/// In-memory store standing in for the remote collaborator.
///
/// Mutations broadcast owner-filtered change events to every open
/// subscription, own-session echoes included, matching the gateway
/// contract. Failure injection and resolution gating let tests steer the
/// optimistic paths deterministically.
pub struct MemoryGateway {
    inner: Mutex<MemoryInner>,
    release: tokio::sync::Notify,
}

impl MemoryGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MemoryInner {
                rows: Vec::new(),
                next_id: 0,
                next_ts: 0,
                subscribers: Vec::new(),
                fail_create: VecDeque::new(),
                fail_update: VecDeque::new(),
                fail_delete: VecDeque::new(),
                fail_subscribe: VecDeque::new(),
                hold_resolutions: false,
            }),
            release: tokio::sync::Notify::new(),
        })
    }

    /// Insert a row without emitting a change event (pre-session state).
    pub fn seed(&self, title: &str, owner_id: &str) -> Task {
        let mut inner = self.inner.lock();
        let task = Self::build_row(&mut inner, title, owner_id, Priority::Medium);
        inner.rows.push(task.clone());
        task
    }

    /// Remove a row without emitting a change event.
    pub fn unseed(&self, id: &str) {
        self.inner.lock().rows.retain(|row| row.id != id);
    }

    pub fn fail_next_create(&self, err: StoreError) {
        self.inner.lock().fail_create.push_back(err);
    }

    pub fn fail_next_update(&self, err: StoreError) {
        self.inner.lock().fail_update.push_back(err);
    }

    pub fn fail_next_delete(&self, err: StoreError) {
        self.inner.lock().fail_delete.push_back(err);
    }

    pub fn fail_next_subscribe(&self, err: StoreError) {
        self.inner.lock().fail_subscribe.push_back(err);
    }

    /// Make mutations broadcast their echo, then wait for
    /// [`release_resolutions`](Self::release_resolutions) before
    /// returning to the caller.
    pub fn hold_resolutions(&self) {
        self.inner.lock().hold_resolutions = true;
    }

    pub fn release_resolutions(&self) {
        self.inner.lock().hold_resolutions = false;
        self.release.notify_waiters();
    }

    /// Drop every open subscription, simulating a feed disconnect.
    pub fn disconnect_feeds(&self) {
        self.inner.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn row_ids(&self) -> Vec<String> {
        self.inner.lock().rows.iter().map(|row| row.id.clone()).collect()
    }

    /// A change committed by another session.
    pub fn remote_insert(&self, title: &str, owner_id: &str) -> Task {
        let (task, event) = {
            let mut inner = self.inner.lock();
            let task = Self::build_row(&mut inner, title, owner_id, Priority::Medium);
            inner.rows.push(task.clone());
            (
                task.clone(),
                ChangeEvent::Insert { after: task },
            )
        };
        self.broadcast(&task.owner_id, event);
        task
    }

    pub fn remote_update(&self, id: &str, patch: TaskPatch) -> Task {
        let (owner, event, updated) = {
            let mut inner = self.inner.lock();
            let row = inner
                .rows
                .iter_mut()
                .find(|row| row.id == id)
                .expect("remote_update: unknown row");
            let before = row.clone();
            *row = patch.apply_to(&before);
            let updated = row.clone();
            (
                updated.owner_id.clone(),
                ChangeEvent::Update {
                    before: Some(before),
                    after: updated.clone(),
                },
                updated,
            )
        };
        self.broadcast(&owner, event);
        updated
    }

    pub fn remote_delete(&self, id: &str) {
        let (owner, event) = {
            let mut inner = self.inner.lock();
            let index = inner
                .rows
                .iter()
                .position(|row| row.id == id)
                .expect("remote_delete: unknown row");
            let before = inner.rows.remove(index);
            (
                before.owner_id.clone(),
                ChangeEvent::Delete { before },
            )
        };
        self.broadcast(&owner, event);
    }

    fn build_row(inner: &mut MemoryInner, title: &str, owner_id: &str, priority: Priority) -> Task {
        inner.next_id += 1;
        inner.next_ts += 1;
        Task {
            id: format!("t{}", inner.next_id),
            title: title.to_string(),
            is_complete: false,
            priority,
            owner_id: owner_id.to_string(),
            created_at: Utc.timestamp_opt(inner.next_ts, 0).unwrap(),
        }
    }

    fn broadcast(&self, owner_id: &str, event: ChangeEvent) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|(owner, sender)| {
            if owner != owner_id {
                return true;
            }
            sender.try_send(event.clone()).is_ok()
        });
    }

    async fn gate(&self) {
        loop {
            let released = self.release.notified();
            if !self.inner.lock().hold_resolutions {
                return;
            }
            released.await;
        }
    }
}

#[async_trait]
impl StoreGateway for MemoryGateway {
    async fn list_by_owner(&self, owner_id: &str) -> std::result::Result<Vec<Task>, StoreError> {
        let mut rows: Vec<Task> = self
            .inner
            .lock()
            .rows
            .iter()
            .filter(|row| row.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create(&self, new: NewTask) -> std::result::Result<Task, StoreError> {
        let (task, event) = {
            let mut inner = self.inner.lock();
            if let Some(err) = inner.fail_create.pop_front() {
                return Err(err);
            }
            let task = Self::build_row(
                &mut inner,
                &new.title,
                &new.owner_id,
                new.priority.unwrap_or_default(),
            );
            inner.rows.push(task.clone());
            (
                task.clone(),
                ChangeEvent::Insert { after: task },
            )
        };
        self.broadcast(&task.owner_id, event);
        self.gate().await;
        Ok(task)
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> std::result::Result<Task, StoreError> {
        let (owner, event, updated) = {
            let mut inner = self.inner.lock();
            if let Some(err) = inner.fail_update.pop_front() {
                return Err(err);
            }
            let row = inner
                .rows
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or_else(|| StoreError::not_found(format!("no row {id}")))?;
            let before = row.clone();
            *row = patch.apply_to(&before);
            let updated = row.clone();
            (
                updated.owner_id.clone(),
                ChangeEvent::Update {
                    before: Some(before),
                    after: updated.clone(),
                },
                updated,
            )
        };
        self.broadcast(&owner, event);
        self.gate().await;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> std::result::Result<(), StoreError> {
        let (owner, event) = {
            let mut inner = self.inner.lock();
            if let Some(err) = inner.fail_delete.pop_front() {
                return Err(err);
            }
            let index = inner
                .rows
                .iter()
                .position(|row| row.id == id)
                .ok_or_else(|| StoreError::not_found(format!("no row {id}")))?;
            let before = inner.rows.remove(index);
            (
                before.owner_id.clone(),
                ChangeEvent::Delete { before },
            )
        };
        self.broadcast(&owner, event);
        self.gate().await;
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> std::result::Result<Subscription, StoreError> {
        let (subscription, sender, _stop) = subscription_channel();
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_subscribe.pop_front() {
            return Err(err);
        }
        inner.subscribers.push((owner_id.to_string(), sender));
        Ok(subscription)
    }
}

/// Sender that records every delivered notification.
pub struct RecordingSender {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn deliver(&self, notification: Notification) -> std::result::Result<(), DeliveryError> {
        self.delivered.lock().push(notification);
        Ok(())
    }
}

/// Assist client for sessions that never exercise the assistant.
pub struct NullAssist;

#[async_trait]
impl AssistClient for NullAssist {
    async fn suggestion(&self, _prompt: &str) -> Result<String> {
        Ok("Task: placeholder".to_string())
    }

    async fn grouping(&self, _tasks: &[GroupingTask]) -> Result<String> {
        Ok("{}".to_string())
    }

    async fn summary(&self, _owner_id: &str, _timeframe: Timeframe) -> Result<String> {
        Ok(String::new())
    }
}

/// Sign in a session against the given gateway with recording
/// notifications.
pub async fn start_session(
    gateway: Arc<MemoryGateway>,
    sender: Arc<RecordingSender>,
) -> tasksync::Session {
    tasksync::Session::sign_in(
        gateway,
        sender,
        Arc::new(NullAssist),
        test_config(),
        OWNER,
    )
    .await
    .expect("sign in")
}
