use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use nearwatch_core::models::Feedback;
use nearwatch_core::submissions::NewFeedbackRequest;
use nearwatch_shared::errors::{AppError, AppResult, ErrorCode};
use nearwatch_shared::middleware::{AdminOperator, OptionalOperator};
use nearwatch_shared::types::ApiResponse;

use super::caller;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeedbackRequest {
    pub owner_identifier: String,
    #[validate(length(min = 1, max = 4000, message = "message must be 1 to 4000 characters"))]
    pub message: String,
}

pub async fn create_feedback(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Json(req): Json<CreateFeedbackRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Feedback>>)> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let feedback = state.feedback.submit(
        NewFeedbackRequest {
            owner_identifier: req.owner_identifier,
            message: req.message,
        },
        caller(&operator),
    )?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(feedback))))
}

pub async fn delete_feedback(
    State(state): State<Arc<AppState>>,
    _admin: AdminOperator,
    Path(feedback_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.feedback.soft_delete(feedback_id)?;
    Ok(Json(ApiResponse::ok_with_message((), "feedback deleted")))
}
