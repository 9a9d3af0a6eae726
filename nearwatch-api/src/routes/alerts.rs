use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use nearwatch_core::alerts::{AlertChanges, NewAlertRequest, VerificationOutcome};
use nearwatch_core::geo::Coordinates;
use nearwatch_core::models::Alert;
use nearwatch_core::store::Visibility;
use nearwatch_shared::clients::queue::dispatch_all;
use nearwatch_shared::errors::{AppError, AppResult, ErrorCode};
use nearwatch_shared::middleware::OptionalOperator;
use nearwatch_shared::types::ApiResponse;

use super::caller;
use crate::AppState;

// --- Request / Response types ---

#[derive(Debug, Deserialize, Validate)]
pub struct AlertRequest {
    pub owner_identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    #[validate(length(max = 500, message = "message is too long"))]
    pub message: String,
    #[validate(email(message = "invalid email format"))]
    pub email: Option<String>,
    #[serde(default)]
    pub use_email: bool,
    #[serde(default)]
    pub use_push: bool,
}

impl AlertRequest {
    fn location(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// An alert as its owner sees it. The stored address stays server-side.
#[derive(Debug, Serialize)]
pub struct AlertView {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub message: String,
    pub has_email: bool,
    pub verified: bool,
    pub use_email: bool,
    pub use_push: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Alert> for AlertView {
    fn from(alert: Alert) -> Self {
        Self {
            id: alert.external_id,
            latitude: alert.latitude,
            longitude: alert.longitude,
            radius_km: alert.radius_km,
            message: alert.message,
            has_email: alert.encrypted_email.is_some(),
            verified: alert.verified,
            use_email: alert.use_email,
            use_push: alert.use_push,
            created_at: alert.created_at,
            deleted_at: alert.deleted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerParams {
    pub owner: String,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationView {
    pub alerts_verified: usize,
    pub already_verified: bool,
}

impl From<VerificationOutcome> for VerificationView {
    fn from(outcome: VerificationOutcome) -> Self {
        Self {
            alerts_verified: outcome.alerts_verified,
            already_verified: outcome.already_verified,
        }
    }
}

/// Validate the body. A blank `email` is a removal request, not a malformed
/// address, so errors on that field alone are ignored for it.
fn validated(req: &AlertRequest) -> AppResult<()> {
    let blank_email = req.email.as_deref().map(str::trim) == Some("");
    match req.validate() {
        Ok(()) => Ok(()),
        Err(e) if blank_email && e.field_errors().keys().all(|field| *field == "email") => Ok(()),
        Err(e) => Err(AppError::new(ErrorCode::ValidationError, e.to_string())),
    }
}

fn pending_message(alert: &Alert) -> Option<&'static str> {
    (!alert.verified).then_some("check your inbox to confirm the email address")
}

fn respond(alert: Alert) -> ApiResponse<AlertView> {
    match pending_message(&alert) {
        Some(message) => ApiResponse::ok_with_message(alert.into(), message),
        None => ApiResponse::ok(alert.into()),
    }
}

// --- POST /alerts ---

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Json(req): Json<AlertRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<AlertView>>)> {
    validated(&req)?;
    let location = req.location();

    let committed = state.alerts.create(
        NewAlertRequest {
            owner_identifier: req.owner_identifier,
            location,
            radius_km: req.radius_km,
            message: req.message,
            email: req.email,
            use_email: req.use_email,
            use_push: req.use_push,
        },
        caller(&operator),
    )?;

    dispatch_all(state.queue.as_ref(), committed.jobs).await;
    Ok((StatusCode::CREATED, Json(respond(committed.record))))
}

// --- PUT /alerts/:id ---

/// Full replacement. An omitted `email` keeps the stored address, an empty
/// string removes it.
pub async fn update_alert(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<AlertRequest>,
) -> AppResult<Json<ApiResponse<AlertView>>> {
    validated(&req)?;
    let location = req.location();

    let committed = state.alerts.update(
        alert_id,
        &req.owner_identifier,
        AlertChanges {
            location,
            radius_km: req.radius_km,
            message: req.message,
            email: req.email,
            use_email: req.use_email,
            use_push: req.use_push,
        },
        caller(&operator),
    )?;

    dispatch_all(state.queue.as_ref(), committed.jobs).await;
    Ok(Json(respond(committed.record)))
}

// --- DELETE /alerts/:id?owner= ---

pub async fn delete_alert(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Path(alert_id): Path<Uuid>,
    Query(params): Query<OwnerParams>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .alerts
        .soft_delete(alert_id, &params.owner, caller(&operator))?;
    Ok(Json(ApiResponse::ok_with_message((), "alert deleted")))
}

// --- GET /alerts?owner=&include_deleted= ---

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    operator: OptionalOperator,
    Query(params): Query<OwnerParams>,
) -> AppResult<Json<ApiResponse<Vec<AlertView>>>> {
    if params.include_deleted && !operator.is_admin() {
        return Err(AppError::forbidden("deleted alerts are visible to admins only"));
    }

    let alerts = state
        .alerts
        .list_for_owner(&params.owner, Visibility::from_flag(params.include_deleted))?;
    Ok(Json(ApiResponse::ok(
        alerts.into_iter().map(AlertView::from).collect(),
    )))
}

// --- GET /alerts/verify?token= ---

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> AppResult<Json<ApiResponse<VerificationView>>> {
    let outcome = state.alerts.verify_email(&params.token)?;
    let message = if outcome.already_verified {
        "email address was already confirmed"
    } else {
        "email address confirmed"
    };
    Ok(Json(ApiResponse::ok_with_message(outcome.into(), message)))
}
