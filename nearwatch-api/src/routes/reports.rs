use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use nearwatch_core::geo::Coordinates;
use nearwatch_core::submissions::NewReportRequest;
use nearwatch_shared::clients::queue::dispatch_all;
use nearwatch_shared::errors::{AppError, AppResult, ErrorCode};
use nearwatch_shared::middleware::{AdminOperator, OptionalOperator};
use nearwatch_shared::types::ApiResponse;

use super::caller;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReportRequest {
    pub reporter_identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reporter_latitude: Option<f64>,
    pub reporter_longitude: Option<f64>,
    #[validate(length(max = 2000, message = "message is too long"))]
    pub message: Option<String>,
    #[serde(default)]
    pub is_emergency: bool,
}

#[derive(Debug, Serialize)]
pub struct ReportCreated {
    pub id: Uuid,
    pub is_emergency: bool,
    pub created_at: DateTime<Utc>,
}

// --- POST /reports ---

pub async fn create_report(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Json(req): Json<CreateReportRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ReportCreated>>)> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let reporter_location = match (req.reporter_latitude, req.reporter_longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
        _ => None,
    };

    let committed = state.reports.submit(
        NewReportRequest {
            reporter_identifier: req.reporter_identifier,
            location: Coordinates::new(req.latitude, req.longitude),
            reporter_location,
            message: req.message,
            is_emergency: req.is_emergency,
        },
        caller(&operator),
    )?;

    dispatch_all(state.queue.as_ref(), committed.jobs).await;

    let report = committed.record;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(ReportCreated {
            id: report.external_id,
            is_emergency: report.is_emergency,
            created_at: report.created_at,
        })),
    ))
}

// --- DELETE /reports/:id ---

pub async fn delete_report(
    State(state): State<Arc<AppState>>,
    AdminOperator(admin): AdminOperator,
    Path(report_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.reports.soft_delete(report_id)?;
    tracing::info!(report_id = %report_id, admin_id = %admin.id, "report removed by admin");
    Ok(Json(ApiResponse::ok_with_message((), "report deleted")))
}
