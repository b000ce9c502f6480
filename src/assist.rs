//! Suggestion assistant.
//!
//! Request/response flows against the LLM collaborator: a single next-task
//! suggestion, batch grouping of the current tasks into categories, and a
//! daily/weekly summary. Every flow is isolated from the task cache:
//! malformed model output becomes a parse error, never a panic and never
//! a cache mutation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AssistConfig;
use crate::error::{Error, Result};
use crate::task::{Priority, Task};

/// Bucket name for tasks the model left out of every group.
pub const UNGROUPED_GROUP: &str = "Ungrouped";

/// Summary timeframe. Each kind carries its own in-flight guard so
/// concurrent daily and weekly requests do not race one shared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Daily,
    Weekly,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::Daily => f.write_str("daily"),
            Timeframe::Weekly => f.write_str("weekly"),
        }
    }
}

/// A parsed next-task suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub title: String,
    /// Absent when the model omitted the priority segment.
    pub priority: Option<Priority>,
}

/// Task fields sent to the grouping endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GroupingTask {
    pub title: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    pub name: String,
    pub task_ids: Vec<String>,
}

/// Categorized view of the current tasks. Only ids present in the input
/// survive; category count is whatever the model returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGrouping {
    pub groups: Vec<TaskGroup>,
}

/// The LLM collaborator boundary. Grouping returns the raw response body;
/// the assistant owns fence stripping and JSON parsing.
#[async_trait]
pub trait AssistClient: Send + Sync {
    async fn suggestion(&self, prompt: &str) -> Result<String>;
    async fn grouping(&self, tasks: &[GroupingTask]) -> Result<String>;
    async fn summary(&self, owner_id: &str, timeframe: Timeframe) -> Result<String>;
}

pub struct SuggestionAssistant {
    client: Arc<dyn AssistClient>,
    drop_ungrouped: bool,
    summaries_in_flight: Mutex<HashSet<Timeframe>>,
}

impl SuggestionAssistant {
    pub fn new(client: Arc<dyn AssistClient>, config: &AssistConfig) -> Self {
        Self {
            client,
            drop_ungrouped: config.drop_ungrouped,
            summaries_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Ask for one new task based on the existing titles.
    pub async fn suggest_next(&self, existing: &[Task]) -> Result<Suggestion> {
        let mut prompt = String::from("Here are the current tasks:\n");
        for task in existing {
            prompt.push_str(&format!(
                "- {} (priority: {})\n",
                task.title, task.priority
            ));
        }
        prompt.push_str(
            "\nSuggest one short new task (max 10 words). \
             Respond with exactly one line in the form:\n\
             Task: <title> | Priority: <low|medium|high>\n",
        );

        let raw = self.client.suggestion(&prompt).await?;
        parse_suggestion(&raw)
    }

    /// Group the given tasks into model-chosen categories.
    pub async fn group_tasks(&self, tasks: &[Task]) -> Result<TaskGrouping> {
        if tasks.is_empty() {
            return Err(Error::InvalidArgument("no tasks to group".to_string()));
        }
        let entries: Vec<GroupingTask> = tasks
            .iter()
            .map(|task| GroupingTask {
                title: task.title.clone(),
                priority: task.priority,
            })
            .collect();

        let raw = self.client.grouping(&entries).await?;
        parse_grouping(&raw, tasks, self.drop_ungrouped)
    }

    /// Generate a markdown summary for the owner's tasks.
    ///
    /// At most one request per timeframe kind runs at a time; a second
    /// same-kind request fails with [`Error::SummaryInFlight`] instead of
    /// racing the first one's completion.
    pub async fn task_summary(&self, owner_id: &str, timeframe: Timeframe) -> Result<String> {
        if !self.summaries_in_flight.lock().insert(timeframe) {
            return Err(Error::SummaryInFlight(timeframe));
        }
        let outcome = self.client.summary(owner_id, timeframe).await;
        self.summaries_in_flight.lock().remove(&timeframe);
        outcome
    }

    /// Loading state for one summary kind.
    pub fn summary_in_flight(&self, timeframe: Timeframe) -> bool {
        self.summaries_in_flight.lock().contains(&timeframe)
    }
}

/// Parse `Task: <title> | Priority: <low|medium|high>`.
///
/// The priority segment may be absent. Anything else is a
/// [`Error::SuggestionParse`].
pub fn parse_suggestion(raw: &str) -> Result<Suggestion> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let rest = line
        .strip_prefix("Task:")
        .ok_or_else(|| Error::SuggestionParse(excerpt(raw)))?;

    let (title_part, priority_part) = match rest.split_once('|') {
        Some((title, priority)) => (title, Some(priority)),
        None => (rest, None),
    };

    let title = title_part.trim();
    if title.is_empty() {
        return Err(Error::SuggestionParse(excerpt(raw)));
    }

    let priority = match priority_part {
        None => None,
        Some(segment) => {
            let value = segment
                .trim()
                .strip_prefix("Priority:")
                .ok_or_else(|| Error::SuggestionParse(excerpt(raw)))?;
            Some(
                Priority::parse(value)
                    .ok_or_else(|| Error::SuggestionParse(excerpt(raw)))?,
            )
        }
    };

    Ok(Suggestion {
        title: title.to_string(),
        priority,
    })
}

/// Parse the grouping response: a JSON object mapping category names to
/// arrays of task ids or 0-based indices into `tasks`, possibly wrapped
/// in a markdown code fence.
fn parse_grouping(raw: &str, tasks: &[Task], drop_ungrouped: bool) -> Result<TaskGrouping> {
    let stripped = strip_code_fences(raw);
    let value: Value =
        serde_json::from_str(stripped).map_err(|err| Error::GroupingParse(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::GroupingParse("expected a JSON object".to_string()))?;

    let known: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    for (name, members) in object {
        let members = members
            .as_array()
            .ok_or_else(|| Error::GroupingParse(format!("group '{name}' is not an array")))?;

        let mut task_ids = Vec::new();
        for member in members {
            let id = match member {
                Value::String(id) => {
                    if known.contains(id.as_str()) {
                        Some(id.clone())
                    } else {
                        debug!("grouping references unknown task id {id}");
                        None
                    }
                }
                Value::Number(index) => index
                    .as_u64()
                    .and_then(|index| tasks.get(index as usize))
                    .map(|task| task.id.clone()),
                _ => None,
            };
            // First group wins when the model repeats an id.
            if let Some(id) = id {
                if seen.insert(id.clone()) {
                    task_ids.push(id);
                }
            }
        }

        if !task_ids.is_empty() {
            groups.push(TaskGroup {
                name: name.clone(),
                task_ids,
            });
        }
    }

    if !drop_ungrouped {
        let leftover: Vec<String> = tasks
            .iter()
            .filter(|task| !seen.contains(&task.id))
            .map(|task| task.id.clone())
            .collect();
        if !leftover.is_empty() {
            groups.push(TaskGroup {
                name: UNGROUPED_GROUP.to_string(),
                task_ids: leftover,
            });
        }
    }

    Ok(TaskGrouping { groups })
}

/// Remove a markdown code fence wrapper (```json ... ```), if present.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn excerpt(raw: &str) -> String {
    const MAX: usize = 80;
    let trimmed = raw.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let cut = trimmed
            .char_indices()
            .take_while(|(index, _)| *index < MAX)
            .last()
            .map(|(index, ch)| index + ch.len_utf8())
            .unwrap_or(MAX);
        format!("{}...", &trimmed[..cut])
    }
}

/// Client posting to the assist API endpoints.
pub struct HttpAssistClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct AiAssistRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct AiAssistResponse {
    result: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct GroupTasksRequest<'a> {
    tasks: &'a [GroupingTask],
}

#[derive(Serialize)]
struct TaskSummaryRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    timeframe: Timeframe,
}

#[derive(Deserialize)]
struct TaskSummaryResponse {
    summary: Option<String>,
    error: Option<String>,
}

impl HttpAssistClient {
    pub fn new(config: &AssistConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl AssistClient for HttpAssistClient {
    async fn suggestion(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("ai-assist"))
            .json(&AiAssistRequest { prompt })
            .send()
            .await?;
        let body: AiAssistResponse = response.json().await?;
        match (body.result, body.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(Error::Assist(error)),
            (None, None) => Err(Error::Assist("empty assist response".to_string())),
        }
    }

    async fn grouping(&self, tasks: &[GroupingTask]) -> Result<String> {
        let response = self
            .client
            .post(self.url("group-tasks"))
            .json(&GroupTasksRequest { tasks })
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Assist(format!("{status}: {body}")));
        }
        Ok(body)
    }

    async fn summary(&self, owner_id: &str, timeframe: Timeframe) -> Result<String> {
        let response = self
            .client
            .post(self.url("task-summary"))
            .json(&TaskSummaryRequest {
                user_id: owner_id,
                timeframe,
            })
            .send()
            .await?;
        let body: TaskSummaryResponse = response.json().await?;
        match (body.summary, body.error) {
            (Some(summary), _) => Ok(summary),
            (None, Some(error)) => Err(Error::Assist(error)),
            (None, None) => Err(Error::Assist("empty summary response".to_string())),
        }
    }
}
