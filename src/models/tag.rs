//! Tag model: reusable labels attached to games, players and tasks.

use serde::{Deserialize, Serialize};

use super::Gender;

/// Lowest and highest spice level a tag or task may carry.
pub const MIN_SPICE: i64 = 1;
pub const MAX_SPICE: i64 = 5;

/// Which players receive a tag automatically when they join a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultForGender {
    #[default]
    None,
    Male,
    Female,
    Both,
}

impl DefaultForGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultForGender::None => "none",
            DefaultForGender::Male => "male",
            DefaultForGender::Female => "female",
            DefaultForGender::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(DefaultForGender::None),
            "male" => Some(DefaultForGender::Male),
            "female" => Some(DefaultForGender::Female),
            "both" => Some(DefaultForGender::Both),
            _ => None,
        }
    }

    /// Whether a newly created player of `gender` should get this tag.
    pub fn applies_to(&self, gender: Option<Gender>) -> bool {
        match (self, gender) {
            (DefaultForGender::Both, _) => true,
            (DefaultForGender::Male, Some(Gender::Male)) => true,
            (DefaultForGender::Female, Some(Gender::Female)) => true,
            _ => false,
        }
    }
}

/// A reusable tag for matching tasks to players.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub min_spice_level: i64,
    pub is_default: bool,
    pub default_for_gender: DefaultForGender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a new tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTagRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_min_spice")]
    pub min_spice_level: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub default_for_gender: DefaultForGender,
}

fn default_min_spice() -> i64 {
    MIN_SPICE
}

/// Request body for updating an existing tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// An empty string clears the description
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_spice_level: Option<i64>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub default_for_gender: Option<DefaultForGender>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Build a URL-friendly slug from a tag name.
///
/// ASCII alphanumerics are lowercased; every other run of characters becomes a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Check that a spice value lies in the 1..=5 range.
pub fn is_valid_spice(value: i64) -> bool {
    (MIN_SPICE..=MAX_SPICE).contains(&value)
}
