//! Notification dispatch.
//!
//! Decides, per confirmed mutation or change event, whether to call the
//! external delivery capability, and keeps a single logical change from
//! producing redundant notifications when it is observed through both the
//! mutation-success path and the change-feed echo path. Delivery is
//! best-effort: failures are logged and never touch the task cache.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::task::{ChangeEvent, Task};

/// Payload handed to the delivery collaborator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub url: String,
}

/// Where a change was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Confirmed result of this session's own mutation.
    LocalMutation,
    /// Change-feed event; `echo` is set when it overlaps an in-flight
    /// pending mutation for the same id.
    Feed { echo: bool },
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The push subscription is permanently dead (`410 Gone` class).
    #[error("subscription gone")]
    SubscriptionGone,

    #[error("{0}")]
    Failed(String),
}

/// Delivery capability. Implementations must not retry into the caller;
/// the dispatcher treats every outcome as final.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(&self, notification: Notification) -> std::result::Result<(), DeliveryError>;
}

/// At-most-once notification policy over the two observation channels.
pub struct NotificationDispatcher {
    sender: std::sync::Arc<dyn NotificationSender>,
    link_url: String,
}

impl NotificationDispatcher {
    pub fn new(sender: std::sync::Arc<dyn NotificationSender>, link_url: String) -> Self {
        Self { sender, link_url }
    }

    /// Report a change. Echo-path events are suppressed: the
    /// mutation-success path already notified, or will once the call
    /// resolves.
    pub async fn dispatch(&self, event: &ChangeEvent, source: ChangeSource) {
        if let ChangeSource::Feed { echo: true } = source {
            debug!(
                "suppressing echo notification for {} ({})",
                event.task_id(),
                event.kind_name()
            );
            return;
        }

        let notification = self.render(event);
        match self.sender.deliver(notification).await {
            Ok(()) => {}
            Err(DeliveryError::SubscriptionGone) => {
                warn!("push subscription is gone; delivery skipped until it is replaced");
            }
            Err(DeliveryError::Failed(reason)) => {
                warn!("notification delivery failed: {reason}");
            }
        }
    }

    fn render(&self, event: &ChangeEvent) -> Notification {
        let (title, task) = describe(event);
        Notification {
            title: title.to_string(),
            body: task.title.clone(),
            url: self.link_url.clone(),
        }
    }
}

fn describe(event: &ChangeEvent) -> (&'static str, &Task) {
    match event {
        ChangeEvent::Insert { after } => ("Task added", after),
        ChangeEvent::Update { before, after } => {
            let title = match before {
                Some(before) if before.is_complete != after.is_complete => {
                    if after.is_complete {
                        "Task completed"
                    } else {
                        "Task reopened"
                    }
                }
                Some(before) if before.title != after.title => "Task renamed",
                Some(before) if before.priority != after.priority => "Task reprioritized",
                _ => "Task updated",
            };
            (title, after)
        }
        ChangeEvent::Delete { before } => ("Task deleted", before),
    }
}

/// Sender that posts to the push delivery collaborator.
///
/// A `410 Gone`-class response marks the stored subscription record as
/// dead; removing it is the delivery collaborator's retention concern.
pub struct HttpNotificationSender {
    client: Client,
    endpoint: String,
    subscription: Value,
}

#[derive(Serialize)]
struct SendNotificationRequest<'a> {
    subscription: &'a Value,
    title: &'a str,
    body: &'a str,
    url: &'a str,
}

impl HttpNotificationSender {
    pub fn new(config: &NotifyConfig, subscription: Value) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            subscription,
        })
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn deliver(&self, notification: Notification) -> std::result::Result<(), DeliveryError> {
        let request = SendNotificationRequest {
            subscription: &self.subscription,
            title: &notification.title,
            body: &notification.body,
            url: &notification.url,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| DeliveryError::Failed(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::GONE => Err(DeliveryError::SubscriptionGone),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DeliveryError::Failed(format!("{status}: {body}")))
            }
        }
    }
}
