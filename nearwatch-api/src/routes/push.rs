use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use nearwatch_core::models::NewWebPushSubscription;
use nearwatch_core::store::PushSubscriptionStore;
use nearwatch_shared::errors::{AppError, AppResult, ErrorCode};
use nearwatch_shared::types::ApiResponse;

use crate::AppState;

/// Browser `PushSubscription.toJSON()` plus the owning device identifier.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterSubscriptionRequest {
    #[validate(length(min = 1, max = 128, message = "owner identifier must be 1 to 128 characters"))]
    pub owner_identifier: String,
    #[validate(url(message = "endpoint must be a URL"))]
    pub endpoint: String,
    #[validate]
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubscriptionKeys {
    #[validate(length(min = 1))]
    pub p256dh: String,
    #[validate(length(min = 1))]
    pub auth: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

pub async fn register_subscription(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterSubscriptionRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<SubscriptionView>>)> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let subscription = state.store.insert_subscription(NewWebPushSubscription {
        owner_identifier: req.owner_identifier.trim().to_string(),
        endpoint: req.endpoint,
        p256dh: req.keys.p256dh,
        auth: req.keys.auth,
        created_at: Utc::now(),
    })?;
    tracing::debug!(subscription_id = subscription.id, "push subscription registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(SubscriptionView {
            endpoint: subscription.endpoint,
            created_at: subscription.created_at,
        })),
    ))
}
