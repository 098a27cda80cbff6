//! Game model and its lifecycle.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Player, Tag};

/// Length of the join code handed out to players.
pub const GAME_CODE_LENGTH: usize = 6;

/// Join code characters, without the easily confused 0/O and 1/I.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a random join code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..GAME_CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Minimum number of players before a game can start.
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Game lifecycle: `waiting -> active -> completed`, never backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Active,
    Completed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Active => "active",
            GameStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(GameStatus::Waiting),
            "active" => Some(GameStatus::Active),
            "completed" => Some(GameStatus::Completed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: GameStatus) -> bool {
        matches!(
            (self, next),
            (GameStatus::Waiting, GameStatus::Active) | (GameStatus::Active, GameStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub code: String,
    pub status: GameStatus,
    pub max_spice_rating: i64,
    /// Game-wide tags inherited by every player for matching
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub players: Vec<Player>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a new game.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    #[serde(default = "default_max_spice")]
    pub max_spice_rating: i64,
    /// Explicit game-wide tags; default tags apply when omitted
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

fn default_max_spice() -> i64 {
    super::MAX_SPICE
}

/// Request body for updating a game's settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGameRequest {
    #[serde(default)]
    pub max_spice_rating: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Available task counts for one player.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAvailability {
    pub player_id: String,
    pub player_name: String,
    pub truths: usize,
    pub dares: usize,
}
