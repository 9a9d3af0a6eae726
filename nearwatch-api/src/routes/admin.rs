use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use nearwatch_core::models::{SystemSettings, REDACTED_SECRET};
use nearwatch_shared::errors::{AppError, AppResult};
use nearwatch_shared::middleware::AdminOperator;
use nearwatch_shared::types::ApiResponse;

use crate::AppState;

/// Partial settings change. Absent fields keep their value; a secret sent
/// back as the redaction placeholder is left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub cooldown_minutes: Option<i32>,
    pub max_report_distance_miles: Option<f64>,
    pub alert_limit_count: Option<i32>,
    pub retention_days: Option<i32>,
    pub min_identifier_length: Option<i32>,
    pub max_alert_radius_km: Option<f64>,
    pub email_notifications_enabled: Option<bool>,
    pub push_notifications_enabled: Option<bool>,
    pub email_from_address: Option<String>,
    pub email_from_name: Option<String>,
    pub resend_api_key: Option<String>,
    pub postmark_server_token: Option<String>,
    pub brevo_api_key: Option<String>,
}

fn set_secret(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        if value != REDACTED_SECRET {
            *target = value.trim().to_string();
        }
    }
}

impl SettingsUpdate {
    fn check(&self) -> AppResult<()> {
        let negative = [
            self.cooldown_minutes,
            self.alert_limit_count,
            self.min_identifier_length,
        ]
        .into_iter()
        .flatten()
        .any(|v| v < 0);
        if negative {
            return Err(AppError::bad_request("counts and durations must not be negative"));
        }

        let non_positive = [self.max_report_distance_miles, self.max_alert_radius_km]
            .into_iter()
            .flatten()
            .any(|v| !v.is_finite() || v <= 0.0);
        if non_positive {
            return Err(AppError::bad_request("distances must be greater than zero"));
        }
        Ok(())
    }

    fn apply(self, current: &SystemSettings) -> SystemSettings {
        let mut next = current.clone();
        if let Some(v) = self.cooldown_minutes { next.cooldown_minutes = v; }
        if let Some(v) = self.max_report_distance_miles { next.max_report_distance_miles = v; }
        if let Some(v) = self.alert_limit_count { next.alert_limit_count = v; }
        if let Some(v) = self.retention_days { next.retention_days = v; }
        if let Some(v) = self.min_identifier_length { next.min_identifier_length = v; }
        if let Some(v) = self.max_alert_radius_km { next.max_alert_radius_km = v; }
        if let Some(v) = self.email_notifications_enabled { next.email_notifications_enabled = v; }
        if let Some(v) = self.push_notifications_enabled { next.push_notifications_enabled = v; }
        if let Some(v) = self.email_from_address { next.email_from_address = v.trim().to_string(); }
        if let Some(v) = self.email_from_name { next.email_from_name = v.trim().to_string(); }
        set_secret(&mut next.resend_api_key, self.resend_api_key);
        set_secret(&mut next.postmark_server_token, self.postmark_server_token);
        set_secret(&mut next.brevo_api_key, self.brevo_api_key);
        next.updated_at = Utc::now();
        next
    }
}

// --- GET /admin/settings ---

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    _admin: AdminOperator,
) -> AppResult<Json<ApiResponse<SystemSettings>>> {
    let settings = state.settings.get()?;
    Ok(Json(ApiResponse::ok(settings.redacted())))
}

// --- PUT /admin/settings ---

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    AdminOperator(admin): AdminOperator,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<ApiResponse<SystemSettings>>> {
    update.check()?;

    // Start from the stored row, not a possibly stale snapshot.
    state.settings.invalidate();
    let current = state.settings.get()?;
    let saved = state.settings.update(update.apply(&current))?;

    tracing::info!(admin_id = %admin.id, "system settings changed");
    Ok(Json(ApiResponse::ok(saved.redacted())))
}
