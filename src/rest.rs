//! REST implementation of the store gateway.
//!
//! Speaks a PostgREST-style API: row filters as query parameters
//! (`owner_id=eq.<id>`), `Prefer: return=representation` on writes, and a
//! long-polled cursor endpoint standing in for the managed store's change
//! feed. Poll failures are retried a few times before the subscription is
//! allowed to end, at which point the reconciler resyncs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::gateway::{subscription_channel, StoreGateway, Subscription};
use crate::task::{ChangeEvent, ChangeEventWire, NewTask, Task, TaskPatch};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;

/// Gateway talking to the task store over HTTP.
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    poll_wait_secs: u64,
}

/// Long-poll response from the change-feed cursor endpoint.
#[derive(Debug, Deserialize)]
struct ChangesPage {
    cursor: u64,
    #[serde(default)]
    events: Vec<ChangeEventWire>,
}

impl RestGateway {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            poll_wait_secs: config.poll_wait_secs,
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.base_url)
    }

    fn changes_url(&self) -> String {
        format!("{}/tasks/changes", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn expect_success(response: Response) -> std::result::Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    /// Writes return the affected rows as a representation array; an empty
    /// array on a patch means the filter matched nothing.
    async fn single_row(response: Response) -> std::result::Result<Task, StoreError> {
        let rows: Vec<Task> = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("no row matched the filter"))
    }
}

fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::NOT_FOUND => StoreError::not_found(message),
        StatusCode::REQUEST_TIMEOUT => StoreError::timeout(message),
        status if status.is_server_error() => StoreError::unavailable(message),
        _ => StoreError::rejected(message),
    }
}

fn request_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::timeout(err.to_string())
    } else {
        StoreError::unavailable(err.to_string())
    }
}

#[async_trait]
impl StoreGateway for RestGateway {
    async fn list_by_owner(&self, owner_id: &str) -> std::result::Result<Vec<Task>, StoreError> {
        let request = self.client.get(self.tasks_url()).query(&[
            ("owner_id", format!("eq.{owner_id}")),
            ("order", "created_at.desc".to_string()),
        ]);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(request_error)?;
        Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(request_error)
    }

    async fn create(&self, new: NewTask) -> std::result::Result<Task, StoreError> {
        let request = self
            .client
            .post(self.tasks_url())
            .header("Prefer", "return=representation")
            .json(&new);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(request_error)?;
        Self::single_row(response).await
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> std::result::Result<Task, StoreError> {
        let request = self
            .client
            .patch(self.tasks_url())
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(request_error)?;
        Self::single_row(response).await
    }

    async fn delete(&self, id: &str) -> std::result::Result<(), StoreError> {
        let request = self
            .client
            .delete(self.tasks_url())
            .query(&[("id", format!("eq.{id}"))]);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(request_error)?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> std::result::Result<Subscription, StoreError> {
        let (subscription, events, mut stop) = subscription_channel();
        let client = self.client.clone();
        let url = self.changes_url();
        let api_key = self.api_key.clone();
        let owner = owner_id.to_string();
        let wait = self.poll_wait_secs.to_string();

        tokio::spawn(async move {
            let mut cursor: u64 = 0;
            let mut failures: u32 = 0;
            loop {
                let cursor_param = cursor.to_string();
                let mut request = client.get(&url).query(&[
                    ("owner_id", owner.as_str()),
                    ("cursor", cursor_param.as_str()),
                    ("wait", wait.as_str()),
                ]);
                if let Some(key) = &api_key {
                    request = request.bearer_auth(key);
                }

                let page = tokio::select! {
                    _ = &mut stop => break,
                    result = poll_once(request) => result,
                };

                let page = match page {
                    Ok(page) => {
                        failures = 0;
                        page
                    }
                    Err(err) => {
                        failures += 1;
                        warn!("change feed poll error ({failures}): {err}");
                        if failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                            // Let the stream end; the consumer resyncs.
                            break;
                        }
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                cursor = page.cursor;
                for wire in page.events {
                    match wire.decode() {
                        Ok(event) => {
                            if deliver(&events, event).await.is_err() {
                                return;
                            }
                        }
                        Err(defect) => warn!("dropping change event: {defect}"),
                    }
                }
            }
            debug!("change feed for {owner} ended");
        });

        Ok(subscription)
    }
}

async fn poll_once(request: RequestBuilder) -> std::result::Result<ChangesPage, StoreError> {
    let response = request.send().await.map_err(request_error)?;
    RestGateway::expect_success(response)
        .await?
        .json()
        .await
        .map_err(request_error)
}

async fn deliver(
    events: &mpsc::Sender<ChangeEvent>,
    event: ChangeEvent,
) -> std::result::Result<(), ()> {
    events.send(event).await.map_err(|_| ())
}
