//! Tag API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{require_non_empty, require_spice, success, ApiResult};
use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::{slugify, CreateTagRequest, Tag, UpdateTagRequest};
use crate::AppState;

/// GET /api/tags - List all tags.
pub async fn list_tags(State(state): State<AppState>) -> ApiResult<Vec<Tag>> {
    success(state.repo.list_tags().await?)
}

/// GET /api/tags/{id} - Get a single tag.
pub async fn get_tag(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Tag> {
    match state.repo.get_tag(&id).await? {
        Some(tag) => success(tag),
        None => Err(AppError::NotFound(format!("Tag {} not found", id))),
    }
}

/// POST /api/tags - Create a new tag.
pub async fn create_tag(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateTagRequest>,
) -> ApiResult<Tag> {
    validate_name(&request.name)?;
    require_spice(request.min_spice_level, "minSpiceLevel")?;

    success(state.repo.create_tag(&request, &actor).await?)
}

/// PUT /api/tags/{id} - Update a tag.
pub async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTagRequest>,
) -> ApiResult<Tag> {
    if let Some(name) = &request.name {
        validate_name(name)?;
    }
    if let Some(level) = request.min_spice_level {
        require_spice(level, "minSpiceLevel")?;
    }

    success(state.repo.update_tag(&id, &request).await?)
}

/// DELETE /api/tags/{id} - Delete a tag.
pub async fn delete_tag(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.repo.delete_tag(&id).await?;
    success(())
}

fn validate_name(name: &str) -> Result<(), AppError> {
    require_non_empty(name, "Tag name")?;
    if slugify(name).is_empty() {
        return Err(AppError::Validation(
            "Tag name must contain at least one letter or digit".to_string(),
        ));
    }
    Ok(())
}
