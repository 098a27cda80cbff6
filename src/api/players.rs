//! Player API endpoints: profile, task draws and task completion.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{require_active, require_non_empty, success, ApiResult, ClearedHistory};
use crate::eligibility::{self, TaskFilter};
use crate::errors::AppError;
use crate::models::{
    CompleteTaskRequest, Player, Task, TaskCompletion, TaskKind, UpdatePlayerRequest,
};
use crate::AppState;

/// Query parameters for drawing tasks.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTaskQuery {
    #[serde(default)]
    pub kind: Option<TaskKind>,
    /// Skip tasks already in the player's history
    #[serde(default)]
    pub exclude_used: bool,
}

/// GET /api/players/{id} - Get a player with its own tags.
pub async fn get_player(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Player> {
    match state.repo.get_player(&id).await? {
        Some(player) => success(player),
        None => Err(AppError::NotFound(format!("Player {} not found", id))),
    }
}

/// PUT /api/players/{id} - Update a player.
pub async fn update_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePlayerRequest>,
) -> ApiResult<Player> {
    if let Some(name) = &request.name {
        require_non_empty(name, "Player name")?;
    }

    success(state.repo.update_player(&id, &request).await?)
}

/// DELETE /api/players/{id} - Remove a player from its game.
pub async fn delete_player(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_player(&id).await?;
    success(())
}

/// GET /api/players/{id}/tags - Tag ids used for matching this player.
pub async fn resolved_player_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<String>> {
    let (player, game) = state.repo.get_player_context(&id).await?;
    success(eligibility::resolve_player_tags(&player, &game).into_iter().collect())
}

/// GET /api/players/{id}/tasks - All tasks currently available to the player.
pub async fn list_player_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PlayerTaskQuery>,
) -> ApiResult<Vec<Task>> {
    let (player, game) = state.repo.get_player_context(&id).await?;
    require_active(&game)?;

    let exclude = if query.exclude_used {
        state.repo.used_task_ids(&id).await?
    } else {
        Default::default()
    };
    let filter = TaskFilter {
        kind: query.kind,
        exclude,
    };
    let tasks = state.repo.list_published_tasks().await?;

    success(
        eligibility::list_available_tasks(&tasks, &player, &game, &filter)
            .into_iter()
            .cloned()
            .collect(),
    )
}

/// GET /api/players/{id}/tasks/random - Draw one unused available task.
pub async fn random_player_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PlayerTaskQuery>,
) -> ApiResult<Task> {
    let (player, game) = state.repo.get_player_context(&id).await?;
    require_active(&game)?;

    let filter = TaskFilter {
        kind: query.kind,
        exclude: state.repo.used_task_ids(&id).await?,
    };
    let tasks = state.repo.list_published_tasks().await?;

    let picked =
        eligibility::pick_random_task(&tasks, &player, &game, &filter, &mut rand::thread_rng())
            .cloned();

    match picked {
        Some(task) => {
            tracing::debug!(player_id = %id, task_id = %task.id, "Drew task");
            success(task)
        }
        None => Err(AppError::NotFound(format!(
            "No unused tasks available for player {}; clear the task history to allow repeats",
            id
        ))),
    }
}

/// POST /api/players/{id}/tasks/{task_id}/complete - Apply a completed task.
pub async fn complete_player_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(String, String)>,
    body: Option<Json<CompleteTaskRequest>>,
) -> ApiResult<TaskCompletion> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    success(state.repo.complete_task(&id, &task_id, &request).await?)
}

/// DELETE /api/players/{id}/used-tasks - Allow repeats for one player.
pub async fn clear_player_used_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClearedHistory> {
    let cleared = state.repo.clear_player_used_tasks(&id).await?;
    success(ClearedHistory { cleared })
}
