//! Task model: a truth question or a dare, with its tag rules.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Whether a task is a question or an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Truth,
    Dare,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Truth => "truth",
            TaskKind::Dare => "dare",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "truth" => Some(TaskKind::Truth),
            "dare" => Some(TaskKind::Dare),
            _ => None,
        }
    }
}

/// A single truth or dare.
///
/// The four tag sets hold tag ids:
/// - `tags`: the player must match at least one (empty means universal)
/// - `tags_to_remove` / `tags_to_add`: applied to the player on completion
/// - `cant_have_tags`: a player holding any of these never sees the task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub spice_rating: i64,
    pub description: String,
    pub is_draft: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub tags_to_remove: BTreeSet<String>,
    #[serde(default)]
    pub tags_to_add: BTreeSet<String>,
    #[serde(default)]
    pub cant_have_tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub kind: TaskKind,
    pub spice_rating: i64,
    pub description: String,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub tags_to_remove: BTreeSet<String>,
    #[serde(default)]
    pub tags_to_add: BTreeSet<String>,
    #[serde(default)]
    pub cant_have_tags: BTreeSet<String>,
}

/// Request body for updating an existing task.
///
/// Tag sets, when present, replace the stored set entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub spice_rating: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_draft: Option<bool>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub tags_to_remove: Option<BTreeSet<String>>,
    #[serde(default)]
    pub tags_to_add: Option<BTreeSet<String>>,
    #[serde(default)]
    pub cant_have_tags: Option<BTreeSet<String>>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Filters accepted when listing tasks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub include_drafts: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}
