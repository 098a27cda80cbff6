//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity. Multi-row
//! writes (tag sets, task completion) run in a single transaction guarded by
//! the row's `version` column.

use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::auth::Actor;
use crate::eligibility;
use crate::errors::AppError;
use crate::models::{
    generate_code, slugify, CompleteTaskRequest, CreateGameRequest, CreatePlayerRequest,
    CreateTagRequest, CreateTaskRequest, DefaultForGender, Game, GameStatus, Gender, Player, Tag,
    Task, TaskCompletion, TaskKind, TaskListQuery, UpdateGameRequest, UpdatePlayerRequest,
    UpdateTagRequest, UpdateTaskRequest, MIN_PLAYERS_TO_START,
};

const TAG_COLUMNS: &str = "tags.id AS id, tags.name AS name, tags.slug AS slug, \
    tags.description AS description, tags.min_spice_level AS min_spice_level, \
    tags.is_default AS is_default, tags.default_for_gender AS default_for_gender, \
    tags.created_by AS created_by, tags.created_at AS created_at, \
    tags.updated_at AS updated_at, tags.version AS version";

const TASK_COLUMNS: &str = "id, kind, spice_rating, description, is_draft, tags, tags_to_remove, \
    tags_to_add, cant_have_tags, created_by, created_at, updated_at, version";

const GAME_COLUMNS: &str =
    "id, code, status, max_spice_rating, created_at, updated_at, version";

const PLAYER_COLUMNS: &str =
    "id, game_id, name, gender, score, is_active, created_at, updated_at, version";

/// Attempts at finding an unused join code before giving up.
const CODE_ATTEMPTS: usize = 16;

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Start a transaction that holds the write lock from its first read.
    ///
    /// Read-modify-write paths must use this: a deferred transaction fails with
    /// SQLITE_BUSY_SNAPSHOT when another writer commits between its read and write.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    // ==================== TAG OPERATIONS ====================

    /// List all tags.
    pub async fn list_tags(&self) -> Result<Vec<Tag>, AppError> {
        let rows = sqlx::query(&format!("SELECT {} FROM tags ORDER BY name", TAG_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(tag_from_row).collect()
    }

    /// Get a tag by ID.
    pub async fn get_tag(&self, id: &str) -> Result<Option<Tag>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_tag(&mut conn, id).await
    }

    /// Create a new tag, stamped with the acting user.
    pub async fn create_tag(&self, request: &CreateTagRequest, actor: &Actor) -> Result<Tag, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();
        let slug = slugify(&request.name);

        sqlx::query(
            "INSERT INTO tags (id, name, slug, description, min_spice_level, is_default, default_for_gender, created_by, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(request.name.trim())
        .bind(&slug)
        .bind(&request.description)
        .bind(request.min_spice_level)
        .bind(request.is_default as i32)
        .bind(request.default_for_gender.as_str())
        .bind(&actor.id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(tag_id = %id, slug = %slug, "Tag created");

        Ok(Tag {
            id,
            name: request.name.trim().to_string(),
            slug,
            description: request.description.clone(),
            min_spice_level: request.min_spice_level,
            is_default: request.is_default,
            default_for_gender: request.default_for_gender,
            created_by: actor.id.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a tag with optimistic concurrency control.
    pub async fn update_tag(&self, id: &str, request: &UpdateTagRequest) -> Result<Tag, AppError> {
        let existing = self
            .get_tag(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tag {} not found", id)))?;

        check_expected_version("Tag", request.expected_version, existing.version)?;

        let now = timestamp();
        let new_version = existing.version + 1;

        let name = request
            .name
            .as_ref()
            .map(|n| n.trim().to_string())
            .unwrap_or(existing.name.clone());
        let slug = slugify(&name);
        let description = match &request.description {
            Some(d) if d.trim().is_empty() => None,
            Some(d) => Some(d.clone()),
            None => existing.description.clone(),
        };
        let min_spice_level = request.min_spice_level.unwrap_or(existing.min_spice_level);
        let is_default = request.is_default.unwrap_or(existing.is_default);
        let default_for_gender = request
            .default_for_gender
            .unwrap_or(existing.default_for_gender);

        // Conditional UPDATE with version check to prevent race conditions
        let result = sqlx::query(
            "UPDATE tags SET name = ?, slug = ?, description = ?, min_spice_level = ?, is_default = ?, default_for_gender = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&name)
        .bind(&slug)
        .bind(&description)
        .bind(min_spice_level)
        .bind(is_default as i32)
        .bind(default_for_gender.as_str())
        .bind(&now)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_tag(id).await?;
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|t| t.version).unwrap_or(0),
            });
        }

        Ok(Tag {
            id: id.to_string(),
            name,
            slug,
            description,
            min_spice_level,
            is_default,
            default_for_gender,
            created_by: existing.created_by,
            created_at: existing.created_at,
            updated_at: now,
            version: new_version,
        })
    }

    /// Delete a tag. Game and player attachments go with it.
    pub async fn delete_tag(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Tag {} not found", id)));
        }

        tracing::info!(tag_id = %id, "Tag deleted");
        Ok(())
    }

    // ==================== TASK OPERATIONS ====================

    /// List tasks, optionally filtered by kind, with pagination.
    pub async fn list_tasks(&self, query: &TaskListQuery, limit: usize) -> Result<Vec<Task>, AppError> {
        let offset = i64::try_from(query.offset)
            .map_err(|_| AppError::Validation(format!("offset {} is out of range", query.offset)))?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM tasks WHERE 1 = 1", TASK_COLUMNS));

        if let Some(kind) = query.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        if !query.include_drafts {
            builder.push(" AND is_draft = 0");
        }
        builder
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// All non-draft tasks, the candidate pool for eligibility checks.
    pub async fn list_published_tasks(&self) -> Result<Vec<Task>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE is_draft = 0 ORDER BY created_at, id",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_task(&mut conn, id).await
    }

    /// Create a new task, stamped with the acting user.
    pub async fn create_task(&self, request: &CreateTaskRequest, actor: &Actor) -> Result<Task, AppError> {
        let mut conn = self.pool.acquire().await?;
        for set in [
            &request.tags,
            &request.tags_to_remove,
            &request.tags_to_add,
            &request.cant_have_tags,
        ] {
            ensure_tags_exist(&mut conn, set).await?;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        sqlx::query(&format!(
            "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
            TASK_COLUMNS
        ))
        .bind(&id)
        .bind(request.kind.as_str())
        .bind(request.spice_rating)
        .bind(request.description.trim())
        .bind(request.is_draft as i32)
        .bind(id_set_to_json(&request.tags)?)
        .bind(id_set_to_json(&request.tags_to_remove)?)
        .bind(id_set_to_json(&request.tags_to_add)?)
        .bind(id_set_to_json(&request.cant_have_tags)?)
        .bind(&actor.id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        tracing::info!(task_id = %id, kind = request.kind.as_str(), "Task created");

        Ok(Task {
            id,
            kind: request.kind,
            spice_rating: request.spice_rating,
            description: request.description.trim().to_string(),
            is_draft: request.is_draft,
            tags: request.tags.clone(),
            tags_to_remove: request.tags_to_remove.clone(),
            tags_to_add: request.tags_to_add.clone(),
            cant_have_tags: request.cant_have_tags.clone(),
            created_by: actor.id.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update a task with optimistic concurrency control.
    pub async fn update_task(&self, id: &str, request: &UpdateTaskRequest) -> Result<Task, AppError> {
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_task(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        check_expected_version("Task", request.expected_version, existing.version)?;

        for set in [
            &request.tags,
            &request.tags_to_remove,
            &request.tags_to_add,
            &request.cant_have_tags,
        ]
        .into_iter()
        .flatten()
        {
            ensure_tags_exist(&mut conn, set).await?;
        }

        let now = timestamp();
        let new_version = existing.version + 1;

        let updated = Task {
            id: id.to_string(),
            kind: request.kind.unwrap_or(existing.kind),
            spice_rating: request.spice_rating.unwrap_or(existing.spice_rating),
            description: request
                .description
                .as_ref()
                .map(|d| d.trim().to_string())
                .unwrap_or(existing.description),
            is_draft: request.is_draft.unwrap_or(existing.is_draft),
            tags: request.tags.clone().unwrap_or(existing.tags),
            tags_to_remove: request.tags_to_remove.clone().unwrap_or(existing.tags_to_remove),
            tags_to_add: request.tags_to_add.clone().unwrap_or(existing.tags_to_add),
            cant_have_tags: request.cant_have_tags.clone().unwrap_or(existing.cant_have_tags),
            created_by: existing.created_by,
            created_at: existing.created_at,
            updated_at: now,
            version: new_version,
        };

        let result = sqlx::query(
            r#"UPDATE tasks SET
                kind = ?, spice_rating = ?, description = ?, is_draft = ?,
                tags = ?, tags_to_remove = ?, tags_to_add = ?, cant_have_tags = ?,
                updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(updated.kind.as_str())
        .bind(updated.spice_rating)
        .bind(&updated.description)
        .bind(updated.is_draft as i32)
        .bind(id_set_to_json(&updated.tags)?)
        .bind(id_set_to_json(&updated.tags_to_remove)?)
        .bind(id_set_to_json(&updated.tags_to_add)?)
        .bind(id_set_to_json(&updated.cant_have_tags)?)
        .bind(&updated.updated_at)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let current = fetch_task(&mut conn, id).await?;
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|t| t.version).unwrap_or(0),
            });
        }

        Ok(updated)
    }

    /// Delete a task. Its usage history goes with it.
    pub async fn delete_task(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", id)));
        }

        tracing::info!(task_id = %id, "Task deleted");
        Ok(())
    }

    // ==================== GAME OPERATIONS ====================

    /// List all games, newest first, without their players.
    pub async fn list_games(&self) -> Result<Vec<Game>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM games ORDER BY created_at DESC",
            GAME_COLUMNS
        ))
        .fetch_all(&mut *conn)
        .await?;

        let mut games = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut game = game_from_row(row)?;
            game.tags = fetch_game_tags(&mut conn, &game.id).await?;
            games.push(game);
        }
        Ok(games)
    }

    /// Get a game with its tags and players.
    pub async fn get_game(&self, id: &str) -> Result<Option<Game>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let Some(mut game) = fetch_game(&mut conn, id).await? else {
            return Ok(None);
        };
        game.players = fetch_game_players(&mut conn, id).await?;
        Ok(Some(game))
    }

    /// Look a game up by its join code (case-insensitive).
    pub async fn get_game_by_code(&self, code: &str) -> Result<Option<Game>, AppError> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM games WHERE code = ?")
            .bind(code.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await?;

        match id {
            Some(id) => self.get_game(&id).await,
            None => Ok(None),
        }
    }

    /// Create a game in `waiting` status with a fresh join code.
    ///
    /// Without an explicit tag list the game inherits every default tag.
    pub async fn create_game(&self, request: &CreateGameRequest) -> Result<Game, AppError> {
        let mut tx = self.begin_write().await?;

        let tag_ids: BTreeSet<String> = match &request.tags {
            Some(ids) => {
                let ids = ids.iter().cloned().collect();
                ensure_tags_exist(&mut tx, &ids).await?;
                ids
            }
            None => sqlx::query_scalar::<_, String>("SELECT id FROM tags WHERE is_default = 1")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect(),
        };

        let mut code = None;
        for _ in 0..CODE_ATTEMPTS {
            let candidate = generate_code(&mut rand::thread_rng());
            let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM games WHERE code = ?")
                .bind(&candidate)
                .fetch_optional(&mut *tx)
                .await?;
            if taken.is_none() {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or_else(|| AppError::Internal("Could not allocate a game code".to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        sqlx::query(&format!(
            "INSERT INTO games ({}) VALUES (?, ?, ?, ?, ?, ?, 1)",
            GAME_COLUMNS
        ))
        .bind(&id)
        .bind(&code)
        .bind(GameStatus::Waiting.as_str())
        .bind(request.max_spice_rating)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        replace_game_tags(&mut tx, &id, &tag_ids).await?;

        let game = fetch_game(&mut tx, &id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Game {} vanished after insert", id)))?;

        tx.commit().await?;

        tracing::info!(game_id = %id, code = %code, "Game created");
        Ok(game)
    }

    /// Update a game's spice cap and game-wide tags.
    pub async fn update_game(&self, id: &str, request: &UpdateGameRequest) -> Result<Game, AppError> {
        let mut tx = self.begin_write().await?;

        let existing = fetch_game(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", id)))?;

        check_expected_version("Game", request.expected_version, existing.version)?;

        if existing.status == GameStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "Game {} is completed and can no longer change",
                id
            )));
        }

        let max_spice_rating = request.max_spice_rating.unwrap_or(existing.max_spice_rating);
        let now = timestamp();

        let result = sqlx::query(
            "UPDATE games SET max_spice_rating = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(max_spice_rating)
        .bind(&now)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: existing.version,
            });
        }

        if let Some(tags) = &request.tags {
            let ids = tags.iter().cloned().collect();
            ensure_tags_exist(&mut tx, &ids).await?;
            replace_game_tags(&mut tx, id, &ids).await?;
        }

        tx.commit().await?;

        self.get_game(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", id)))
    }

    /// Delete a game with its players and history.
    pub async fn delete_game(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM games WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Game {} not found", id)));
        }

        tracing::info!(game_id = %id, "Game deleted");
        Ok(())
    }

    /// Move a game along its lifecycle.
    ///
    /// Starting requires at least [`MIN_PLAYERS_TO_START`] players.
    pub async fn transition_game(&self, id: &str, next: GameStatus) -> Result<Game, AppError> {
        let mut tx = self.begin_write().await?;

        let game = fetch_game(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", id)))?;

        if !game.status.can_transition_to(next) {
            return Err(AppError::InvalidState(format!(
                "Game cannot move from {} to {}",
                game.status.as_str(),
                next.as_str()
            )));
        }

        if next == GameStatus::Active {
            let players: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM players WHERE game_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            if (players as usize) < MIN_PLAYERS_TO_START {
                return Err(AppError::InvalidState(format!(
                    "At least {} players are required to start, found {}",
                    MIN_PLAYERS_TO_START, players
                )));
            }
        }

        let result = sqlx::query(
            "UPDATE games SET status = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(next.as_str())
        .bind(timestamp())
        .bind(id)
        .bind(game.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: game.version,
            });
        }

        tx.commit().await?;

        tracing::info!(game_id = %id, status = next.as_str(), "Game status changed");

        self.get_game(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", id)))
    }

    /// Forget every player's task history in a game. Returns the number of entries cleared.
    pub async fn clear_game_used_tasks(&self, game_id: &str) -> Result<u64, AppError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM games WHERE id = ?")
            .bind(game_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Game {} not found", game_id)));
        }

        let result = sqlx::query("DELETE FROM used_tasks WHERE game_id = ?")
            .bind(game_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(game_id = %game_id, cleared = result.rows_affected(), "Cleared game task history");
        Ok(result.rows_affected())
    }

    // ==================== PLAYER OPERATIONS ====================

    /// Get a player with its own tags.
    pub async fn get_player(&self, id: &str) -> Result<Option<Player>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_player(&mut conn, id).await
    }

    /// Load a player together with its game (game tags included, players omitted).
    pub async fn get_player_context(&self, player_id: &str) -> Result<(Player, Game), AppError> {
        let mut conn = self.pool.acquire().await?;
        let player = fetch_player(&mut conn, player_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Player {} not found", player_id)))?;
        let game = fetch_game(&mut conn, &player.game_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", player.game_id)))?;
        Ok((player, game))
    }

    /// Add a player to a game that has not finished.
    ///
    /// Without an explicit tag list the player receives the gender default tags.
    pub async fn create_player(
        &self,
        game_id: &str,
        request: &CreatePlayerRequest,
    ) -> Result<Player, AppError> {
        let mut tx = self.begin_write().await?;

        let game = fetch_game(&mut tx, game_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", game_id)))?;
        if game.status == GameStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "Game {} is completed and cannot take new players",
                game_id
            )));
        }

        let tag_ids: BTreeSet<String> = match &request.tags {
            Some(ids) => {
                let ids = ids.iter().cloned().collect();
                ensure_tags_exist(&mut tx, &ids).await?;
                ids
            }
            None => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM tags WHERE default_for_gender != 'none'",
                    TAG_COLUMNS
                ))
                .fetch_all(&mut *tx)
                .await?;
                rows.iter()
                    .map(tag_from_row)
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter(|t| t.default_for_gender.applies_to(request.gender))
                    .map(|t| t.id)
                    .collect()
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        sqlx::query(&format!(
            "INSERT INTO players ({}) VALUES (?, ?, ?, ?, 0, 1, ?, ?, 1)",
            PLAYER_COLUMNS
        ))
        .bind(&id)
        .bind(game_id)
        .bind(request.name.trim())
        .bind(request.gender.map(|g| g.as_str()))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        replace_player_tags(&mut tx, &id, &tag_ids).await?;

        let player = fetch_player(&mut tx, &id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Player {} vanished after insert", id)))?;

        tx.commit().await?;

        tracing::info!(game_id = %game_id, player_id = %id, "Player joined game");
        Ok(player)
    }

    /// Update a player with optimistic concurrency control.
    ///
    /// A tag list, when given, replaces the player's own tags.
    pub async fn update_player(
        &self,
        id: &str,
        request: &UpdatePlayerRequest,
    ) -> Result<Player, AppError> {
        let mut tx = self.begin_write().await?;

        let existing = fetch_player(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Player {} not found", id)))?;

        check_expected_version("Player", request.expected_version, existing.version)?;

        let name = request
            .name
            .as_ref()
            .map(|n| n.trim().to_string())
            .unwrap_or(existing.name.clone());
        let gender = request.gender.or(existing.gender);
        let is_active = request.is_active.unwrap_or(existing.is_active);

        let result = sqlx::query(
            "UPDATE players SET name = ?, gender = ?, is_active = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(&name)
        .bind(gender.map(|g| g.as_str()))
        .bind(is_active as i32)
        .bind(timestamp())
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: existing.version,
            });
        }

        if let Some(tags) = &request.tags {
            let ids = tags.iter().cloned().collect();
            ensure_tags_exist(&mut tx, &ids).await?;
            replace_player_tags(&mut tx, id, &ids).await?;
        }

        let player = fetch_player(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Player {} not found", id)))?;

        tx.commit().await?;
        Ok(player)
    }

    /// Remove a player from its game.
    pub async fn delete_player(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM players WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Player {} not found", id)));
        }

        tracing::info!(player_id = %id, "Player removed");
        Ok(())
    }

    /// Task ids the player has already been through.
    pub async fn used_task_ids(&self, player_id: &str) -> Result<BTreeSet<String>, AppError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT task_id FROM used_tasks WHERE player_id = ?")
            .bind(player_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Forget one player's task history. Returns the number of entries cleared.
    pub async fn clear_player_used_tasks(&self, player_id: &str) -> Result<u64, AppError> {
        if self.get_player(player_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Player {} not found", player_id)));
        }

        let result = sqlx::query("DELETE FROM used_tasks WHERE player_id = ?")
            .bind(player_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Complete a task for a player in one transaction.
    ///
    /// Removes then adds tags, increments the score, and optionally records the
    /// task in the player's history. The player row's version guards against
    /// two completions racing on the same player.
    pub async fn complete_task(
        &self,
        player_id: &str,
        task_id: &str,
        request: &CompleteTaskRequest,
    ) -> Result<TaskCompletion, AppError> {
        let mut tx = self.begin_write().await?;

        let mut player = fetch_player(&mut tx, player_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Player {} not found", player_id)))?;

        check_expected_version("Player", request.expected_version, player.version)?;

        let game = fetch_game(&mut tx, &player.game_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Game {} not found", player.game_id)))?;
        if game.status != GameStatus::Active {
            return Err(AppError::InvalidState(format!(
                "Game is {}, tasks can only be completed while it is active",
                game.status.as_str()
            )));
        }

        let task = fetch_task(&mut tx, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;
        if !eligibility::is_task_available(&task, &player, &game) {
            return Err(AppError::InvalidState(format!(
                "Task {} is not available to player {}",
                task_id, player_id
            )));
        }

        let catalog = fetch_tags_by_ids(&mut tx, &task.tags_to_add).await?;
        let original_version = player.version;
        let effects = eligibility::complete_task(&task, &mut player, &catalog);
        let now = timestamp();

        // Claim the player row first; a concurrent completion loses here.
        let result = sqlx::query(
            "UPDATE players SET score = ?, updated_at = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(player.score)
        .bind(&now)
        .bind(player_id)
        .bind(original_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::VersionMismatch {
                message: "Player changed while completing the task".to_string(),
                current_version: original_version,
            });
        }

        for tag_id in &effects.removed {
            sqlx::query("DELETE FROM player_tags WHERE player_id = ? AND tag_id = ?")
                .bind(player_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }
        for tag_id in &effects.added {
            sqlx::query("INSERT OR IGNORE INTO player_tags (player_id, tag_id) VALUES (?, ?)")
                .bind(player_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }

        if request.record_usage {
            sqlx::query(
                "INSERT OR IGNORE INTO used_tasks (game_id, player_id, task_id, used_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&player.game_id)
            .bind(player_id)
            .bind(task_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        player.version = original_version + 1;
        player.updated_at = now;

        tracing::info!(
            player_id = %player_id,
            task_id = %task_id,
            removed = effects.removed.len(),
            added = effects.added.len(),
            "Task completed"
        );

        Ok(TaskCompletion {
            player,
            removed_tags: effects.removed,
            added_tags: effects.added,
        })
    }
}

// Connection-level helpers shared by pooled and transactional paths

/// Fixed-width UTC timestamp, so `ORDER BY created_at` sorts chronologically.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn check_expected_version(kind: &str, expected: Option<i64>, current: i64) -> Result<(), AppError> {
    match expected {
        Some(expected) if expected != current => {
            Err(AppError::version_mismatch(kind, expected, current))
        }
        _ => Ok(()),
    }
}

async fn fetch_tag(conn: &mut SqliteConnection, id: &str) -> Result<Option<Tag>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM tags WHERE id = ?", TAG_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(tag_from_row).transpose()
}

async fn fetch_tags_by_ids(
    conn: &mut SqliteConnection,
    ids: &BTreeSet<String>,
) -> Result<Vec<Tag>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM tags WHERE id IN (", TAG_COLUMNS));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY name");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(tag_from_row).collect()
}

/// Reject references to tags that do not exist.
async fn ensure_tags_exist(conn: &mut SqliteConnection, ids: &BTreeSet<String>) -> Result<(), AppError> {
    let found: BTreeSet<String> = fetch_tags_by_ids(conn, ids)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();

    let missing: Vec<&str> = ids.difference(&found).map(String::as_str).collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown tag ids: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

async fn fetch_task(conn: &mut SqliteConnection, id: &str) -> Result<Option<Task>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(task_from_row).transpose()
}

async fn fetch_game_tags(conn: &mut SqliteConnection, game_id: &str) -> Result<Vec<Tag>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM tags JOIN game_tags ON game_tags.tag_id = tags.id WHERE game_tags.game_id = ? ORDER BY tags.name",
        TAG_COLUMNS
    ))
    .bind(game_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(tag_from_row).collect()
}

async fn fetch_player_tags(conn: &mut SqliteConnection, player_id: &str) -> Result<Vec<Tag>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM tags JOIN player_tags ON player_tags.tag_id = tags.id WHERE player_tags.player_id = ? ORDER BY tags.name",
        TAG_COLUMNS
    ))
    .bind(player_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(tag_from_row).collect()
}

/// Game with its tags; players are left empty.
async fn fetch_game(conn: &mut SqliteConnection, id: &str) -> Result<Option<Game>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM games WHERE id = ?", GAME_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut game = game_from_row(&row)?;
    game.tags = fetch_game_tags(conn, id).await?;
    Ok(Some(game))
}

async fn fetch_player(conn: &mut SqliteConnection, id: &str) -> Result<Option<Player>, AppError> {
    let row = sqlx::query(&format!("SELECT {} FROM players WHERE id = ?", PLAYER_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut player = player_from_row(&row);
    player.tags = fetch_player_tags(conn, id).await?;
    Ok(Some(player))
}

async fn fetch_game_players(conn: &mut SqliteConnection, game_id: &str) -> Result<Vec<Player>, AppError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM players WHERE game_id = ? ORDER BY created_at, id",
        PLAYER_COLUMNS
    ))
    .bind(game_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut players = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut player = player_from_row(row);
        player.tags = fetch_player_tags(conn, &player.id).await?;
        players.push(player);
    }
    Ok(players)
}

async fn replace_game_tags(
    conn: &mut SqliteConnection,
    game_id: &str,
    tag_ids: &BTreeSet<String>,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM game_tags WHERE game_id = ?")
        .bind(game_id)
        .execute(&mut *conn)
        .await?;

    for tag_id in tag_ids {
        sqlx::query("INSERT INTO game_tags (game_id, tag_id) VALUES (?, ?)")
            .bind(game_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn replace_player_tags(
    conn: &mut SqliteConnection,
    player_id: &str,
    tag_ids: &BTreeSet<String>,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM player_tags WHERE player_id = ?")
        .bind(player_id)
        .execute(&mut *conn)
        .await?;

    for tag_id in tag_ids {
        sqlx::query("INSERT INTO player_tags (player_id, tag_id) VALUES (?, ?)")
            .bind(player_id)
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

// Helper functions for row conversion

fn tag_from_row(row: &SqliteRow) -> Result<Tag, AppError> {
    let is_default: i32 = row.get("is_default");
    let default_for_gender: String = row.get("default_for_gender");

    Ok(Tag {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        min_spice_level: row.get("min_spice_level"),
        is_default: is_default != 0,
        default_for_gender: DefaultForGender::parse(&default_for_gender).ok_or_else(|| {
            AppError::Internal(format!("Unknown defaultForGender '{}'", default_for_gender))
        })?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, AppError> {
    let kind: String = row.get("kind");
    let is_draft: i32 = row.get("is_draft");

    Ok(Task {
        id: row.get("id"),
        kind: TaskKind::parse(&kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown task kind '{}'", kind)))?,
        spice_rating: row.get("spice_rating"),
        description: row.get("description"),
        is_draft: is_draft != 0,
        tags: parse_id_set(row.get("tags")),
        tags_to_remove: parse_id_set(row.get("tags_to_remove")),
        tags_to_add: parse_id_set(row.get("tags_to_add")),
        cant_have_tags: parse_id_set(row.get("cant_have_tags")),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

fn game_from_row(row: &SqliteRow) -> Result<Game, AppError> {
    let status: String = row.get("status");

    Ok(Game {
        id: row.get("id"),
        code: row.get("code"),
        status: GameStatus::parse(&status)
            .ok_or_else(|| AppError::Internal(format!("Unknown game status '{}'", status)))?,
        max_spice_rating: row.get("max_spice_rating"),
        tags: Vec::new(),
        players: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

fn player_from_row(row: &SqliteRow) -> Player {
    let gender: Option<String> = row.get("gender");
    let is_active: i32 = row.get("is_active");

    Player {
        id: row.get("id"),
        game_id: row.get("game_id"),
        name: row.get("name"),
        gender: gender.as_deref().and_then(Gender::parse),
        score: row.get("score"),
        tags: Vec::new(),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn id_set_to_json(ids: &BTreeSet<String>) -> Result<String, AppError> {
    Ok(serde_json::to_string(ids)?)
}

fn parse_id_set(s: String) -> BTreeSet<String> {
    serde_json::from_str(&s).unwrap_or_default()
}
