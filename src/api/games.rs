//! Game API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{require_non_empty, require_spice, success, ApiResult, ClearedHistory};
use crate::eligibility::{self, TaskFilter};
use crate::errors::AppError;
use crate::models::{
    CreateGameRequest, CreatePlayerRequest, Game, GameStatus, Player, PlayerAvailability,
    TaskKind, UpdateGameRequest,
};
use crate::AppState;

/// GET /api/games - List all games.
pub async fn list_games(State(state): State<AppState>) -> ApiResult<Vec<Game>> {
    success(state.repo.list_games().await?)
}

/// GET /api/games/{id} - Get a game with its players.
pub async fn get_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Game> {
    match state.repo.get_game(&id).await? {
        Some(game) => success(game),
        None => Err(AppError::NotFound(format!("Game {} not found", id))),
    }
}

/// GET /api/games/code/{code} - Find a game by its join code.
pub async fn get_game_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Game> {
    match state.repo.get_game_by_code(&code).await? {
        Some(game) => success(game),
        None => Err(AppError::NotFound(format!("No game with code {}", code))),
    }
}

/// POST /api/games - Create a new game.
pub async fn create_game(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> ApiResult<Game> {
    require_spice(request.max_spice_rating, "maxSpiceRating")?;

    success(state.repo.create_game(&request).await?)
}

/// PUT /api/games/{id} - Update spice cap and game-wide tags.
pub async fn update_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateGameRequest>,
) -> ApiResult<Game> {
    if let Some(rating) = request.max_spice_rating {
        require_spice(rating, "maxSpiceRating")?;
    }

    success(state.repo.update_game(&id, &request).await?)
}

/// DELETE /api/games/{id} - Delete a game.
pub async fn delete_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_game(&id).await?;
    success(())
}

/// POST /api/games/{id}/start - Move a waiting game to active.
pub async fn start_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Game> {
    success(state.repo.transition_game(&id, GameStatus::Active).await?)
}

/// POST /api/games/{id}/finish - Complete an active game.
pub async fn finish_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Game> {
    success(state.repo.transition_game(&id, GameStatus::Completed).await?)
}

/// POST /api/games/{id}/players - Add a player to a game.
pub async fn create_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreatePlayerRequest>,
) -> ApiResult<Player> {
    require_non_empty(&request.name, "Player name")?;

    success(state.repo.create_player(&id, &request).await?)
}

/// DELETE /api/games/{id}/used-tasks - Allow repeats for every player in a game.
pub async fn clear_game_used_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClearedHistory> {
    let cleared = state.repo.clear_game_used_tasks(&id).await?;
    success(ClearedHistory { cleared })
}

/// GET /api/games/{id}/availability - Count unused available truths and dares per active player.
pub async fn game_availability(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<PlayerAvailability>> {
    let game = state
        .repo
        .get_game(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Game {} not found", id)))?;
    let tasks = state.repo.list_published_tasks().await?;

    let mut report = Vec::new();
    for player in game.players.iter().filter(|p| p.is_active) {
        let filter = TaskFilter {
            kind: None,
            exclude: state.repo.used_task_ids(&player.id).await?,
        };
        let available = eligibility::list_available_tasks(&tasks, player, &game, &filter);

        report.push(PlayerAvailability {
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            truths: available.iter().filter(|t| t.kind == TaskKind::Truth).count(),
            dares: available.iter().filter(|t| t.kind == TaskKind::Dare).count(),
        });
    }

    success(report)
}
