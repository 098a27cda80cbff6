//! REST API module.
//!
//! Handlers validate input, call the repository and the eligibility rules,
//! and wrap results in the `{ success, data }` envelope.

mod games;
mod players;
mod tags;
mod tasks;

pub use games::*;
pub use players::*;
pub use tags::*;
pub use tasks::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{is_valid_spice, Game, GameStatus, MAX_SPICE, MIN_SPICE};

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Number of history entries removed by a clear operation.
#[derive(Debug, Serialize)]
pub struct ClearedHistory {
    pub cleared: u64,
}

fn require_non_empty(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn require_spice(value: i64, field: &str) -> Result<(), AppError> {
    if !is_valid_spice(value) {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {}, got {}",
            field, MIN_SPICE, MAX_SPICE, value
        )));
    }
    Ok(())
}

/// Tasks are only drawn and completed while the game is running.
fn require_active(game: &Game) -> Result<(), AppError> {
    if game.status != GameStatus::Active {
        return Err(AppError::InvalidState(format!(
            "Game {} is {}, not active",
            game.code,
            game.status.as_str()
        )));
    }
    Ok(())
}
