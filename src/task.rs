//! Task entity model.
//!
//! The canonical task row lives in the remote store; clients hold copies in
//! the local cache. Optimistic placeholders carry a client-generated
//! `local-` id until the store confirms the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const LOCAL_ID_PREFIX: &str = "local-";

/// Task priority, stored lowercase on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse a priority name, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row as held in the cache and exchanged with the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub is_complete: bool,
    #[serde(default)]
    pub priority: Priority,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build an optimistic placeholder with a client-generated id.
    ///
    /// The id is correlated with the create call and replaced by the
    /// store-assigned row on confirmation.
    pub fn placeholder(title: impl Into<String>, priority: Priority, owner_id: impl Into<String>) -> Self {
        Self {
            id: format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()),
            title: title.into(),
            is_complete: false,
            priority,
            owner_id: owner_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether this task is an unconfirmed optimistic placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// Fields the client supplies when creating a task; the store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Partial update applied to a task row by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TaskPatch {
    pub fn title(value: impl Into<String>) -> Self {
        Self {
            title: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn completion(value: bool) -> Self {
        Self {
            is_complete: Some(value),
            ..Self::default()
        }
    }

    pub fn priority(value: Priority) -> Self {
        Self {
            priority: Some(value),
            ..Self::default()
        }
    }

    /// Produce the task value this patch yields when applied to `task`.
    pub fn apply_to(&self, task: &Task) -> Task {
        let mut updated = task.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(is_complete) = self.is_complete {
            updated.is_complete = is_complete;
        }
        if let Some(priority) = self.priority {
            updated.priority = priority;
        }
        updated
    }
}

/// A committed row change delivered by the store's change feed.
///
/// The variant set is closed; unknown wire kinds are rejected at decode
/// time rather than silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { after: Task },
    Update { before: Option<Task>, after: Task },
    Delete { before: Task },
}

impl ChangeEvent {
    /// The id of the row the event refers to.
    pub fn task_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { after } => &after.id,
            ChangeEvent::Update { after, .. } => &after.id,
            ChangeEvent::Delete { before } => &before.id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

/// Wire shape of a change-feed event: `{eventType, new, old}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEventWire {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Option<Task>,
    #[serde(default)]
    pub old: Option<Task>,
}

impl ChangeEventWire {
    /// Decode into the closed event variant.
    ///
    /// Returns a description of the defect when the kind is unknown or a
    /// required row snapshot is missing.
    pub fn decode(self) -> std::result::Result<ChangeEvent, String> {
        match self.event_type.as_str() {
            "INSERT" => match self.new {
                Some(after) => Ok(ChangeEvent::Insert { after }),
                None => Err("INSERT event without new row".to_string()),
            },
            "UPDATE" => match self.new {
                Some(after) => Ok(ChangeEvent::Update {
                    before: self.old,
                    after,
                }),
                None => Err("UPDATE event without new row".to_string()),
            },
            "DELETE" => match self.old {
                Some(before) => Ok(ChangeEvent::Delete { before }),
                None => Err("DELETE event without old row".to_string()),
            },
            other => Err(format!("unknown change event kind '{other}'")),
        }
    }
}

/// Default cache ordering: newest first, id as a deterministic tiebreak.
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}
