//! Task API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{require_non_empty, require_spice, success, ApiResult};
use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::{CreateTaskRequest, Task, TaskListQuery, UpdateTaskRequest};
use crate::AppState;

/// Maximum page size for task listings.
const MAX_PAGE_SIZE: usize = 200;

/// GET /api/tasks - List tasks, filtered by kind, with pagination.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Vec<Task>> {
    let limit = query
        .limit
        .unwrap_or(state.config.default_page_size)
        .min(MAX_PAGE_SIZE);

    success(state.repo.list_tasks(&query, limit).await?)
}

/// GET /api/tasks/{id} - Get a single task.
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Task> {
    match state.repo.get_task(&id).await? {
        Some(task) => success(task),
        None => Err(AppError::NotFound(format!("Task {} not found", id))),
    }
}

/// POST /api/tasks - Create a new task.
pub async fn create_task(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Task> {
    require_non_empty(&request.description, "Description")?;
    require_spice(request.spice_rating, "spiceRating")?;

    success(state.repo.create_task(&request, &actor).await?)
}

/// PUT /api/tasks/{id} - Update a task.
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<Task> {
    if let Some(description) = &request.description {
        require_non_empty(description, "Description")?;
    }
    if let Some(rating) = request.spice_rating {
        require_spice(rating, "spiceRating")?;
    }

    success(state.repo.update_task(&id, &request).await?)
}

/// DELETE /api/tasks/{id} - Delete a task.
pub async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_task(&id).await?;
    success(())
}
