//! Player model.

use serde::{Deserialize, Serialize};

use super::Tag;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// A participant in a single game, owning its own tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub game_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    pub score: i64,
    /// Own tags, independent of the game-wide tags
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Player {
    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }
}

/// Request body for adding a player to a game.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlayerRequest {
    pub name: String,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Explicit own tags; gender defaults apply when omitted
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Request body for updating a player.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for completing a task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    /// Record the task in the player's history so it is not picked again
    #[serde(default = "default_record_usage")]
    pub record_usage: bool,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

fn default_record_usage() -> bool {
    true
}

impl Default for CompleteTaskRequest {
    fn default() -> Self {
        Self {
            record_usage: default_record_usage(),
            expected_version: None,
        }
    }
}

/// Outcome of a completed task, reported back to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub player: Player,
    pub removed_tags: Vec<String>,
    pub added_tags: Vec<String>,
}
