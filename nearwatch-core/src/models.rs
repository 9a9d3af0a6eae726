use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinates;
use crate::schema::{alerts, email_verifications, feedback, reports, system_settings, web_push_subscriptions};

/// Rows that are hidden by a deletion timestamp instead of being removed.
/// Every read path filters on this the same way; see `store::Visibility`.
pub trait SoftDelete: Clone + Send + Sync + 'static {
    fn external_id(&self) -> Uuid;
    fn owner(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn mark_deleted(&mut self, at: DateTime<Utc>);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

macro_rules! soft_delete_fields {
    ($model:ty, $owner:ident) => {
        impl SoftDelete for $model {
            fn external_id(&self) -> Uuid {
                self.external_id
            }

            fn owner(&self) -> &str {
                &self.$owner
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }

            fn mark_deleted(&mut self, at: DateTime<Utc>) {
                self.deleted_at = Some(at);
            }
        }
    };
}

// --- Report ---

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = reports)]
pub struct Report {
    pub id: i64,
    pub external_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub message: Option<String>,
    pub reporter_latitude: Option<f64>,
    pub reporter_longitude: Option<f64>,
    pub is_emergency: bool,
    pub reporter_identifier: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn location(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn reporter_location(&self) -> Option<Coordinates> {
        match (self.reporter_latitude, self.reporter_longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

soft_delete_fields!(Report, reporter_identifier);

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reports)]
pub struct NewReport {
    pub external_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub message: Option<String>,
    pub reporter_latitude: Option<f64>,
    pub reporter_longitude: Option<f64>,
    pub is_emergency: bool,
    pub reporter_identifier: String,
    pub created_at: DateTime<Utc>,
}

// --- Alert ---

#[derive(Debug, Clone, PartialEq, Queryable, QueryableByName, Identifiable, AsChangeset)]
#[diesel(table_name = alerts, treat_none_as_null = true)]
pub struct Alert {
    pub id: i64,
    pub external_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub message: String,
    pub owner_identifier: String,
    pub encrypted_email: Option<String>,
    pub email_hash: Option<String>,
    pub verified: bool,
    pub use_email: bool,
    pub use_push: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Push-only alerts need no email confirmation.
    pub fn is_push_only(&self) -> bool {
        self.use_push && !self.use_email
    }
}

soft_delete_fields!(Alert, owner_identifier);

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = alerts)]
pub struct NewAlert {
    pub external_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub message: String,
    pub owner_identifier: String,
    pub encrypted_email: Option<String>,
    pub email_hash: Option<String>,
    pub verified: bool,
    pub use_email: bool,
    pub use_push: bool,
    pub created_at: DateTime<Utc>,
}

// --- Feedback ---

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize)]
#[diesel(table_name = feedback)]
pub struct Feedback {
    #[serde(skip)]
    pub id: i64,
    pub external_id: Uuid,
    pub message: String,
    #[serde(skip)]
    pub owner_identifier: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

soft_delete_fields!(Feedback, owner_identifier);

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = feedback)]
pub struct NewFeedback {
    pub external_id: Uuid,
    pub message: String,
    pub owner_identifier: String,
    pub created_at: DateTime<Utc>,
}

// --- EmailVerification ---

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = email_verifications)]
pub struct EmailVerification {
    pub id: i64,
    pub email_hash: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl EmailVerification {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_verifications)]
pub struct NewEmailVerification {
    pub email_hash: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

// --- WebPushSubscription ---

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize)]
#[diesel(table_name = web_push_subscriptions)]
pub struct WebPushSubscription {
    pub id: i64,
    pub owner_identifier: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = web_push_subscriptions)]
pub struct NewWebPushSubscription {
    pub owner_identifier: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
}

// --- SystemSettings ---

pub const SETTINGS_ROW_ID: i32 = 1;

/// Singleton row of tunable thresholds, channel kill switches, and provider
/// credentials. Read through `SettingsCache`.
#[derive(Debug, Clone, PartialEq, Queryable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = system_settings)]
pub struct SystemSettings {
    pub id: i32,
    pub cooldown_minutes: i32,
    pub max_report_distance_miles: f64,
    pub alert_limit_count: i32,
    pub retention_days: i32,
    pub min_identifier_length: i32,
    pub max_alert_radius_km: f64,
    pub email_notifications_enabled: bool,
    pub push_notifications_enabled: bool,
    pub email_from_address: String,
    pub email_from_name: String,
    pub resend_api_key: String,
    pub postmark_server_token: String,
    pub brevo_api_key: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ROW_ID,
            cooldown_minutes: 10,
            max_report_distance_miles: 10.0,
            alert_limit_count: 3,
            retention_days: 30,
            min_identifier_length: 8,
            max_alert_radius_km: 160.9,
            email_notifications_enabled: true,
            push_notifications_enabled: true,
            email_from_address: "alerts@nearwatch.local".into(),
            email_from_name: "Nearwatch".into(),
            resend_api_key: String::new(),
            postmark_server_token: String::new(),
            brevo_api_key: String::new(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Placeholder shown instead of a stored provider secret.
pub const REDACTED_SECRET: &str = "********";

impl SystemSettings {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes.max(0)))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days.max(0)))
    }

    /// Copy with provider secrets blanked, for display.
    pub fn redacted(&self) -> Self {
        fn mask(secret: &str) -> String {
            if secret.is_empty() { String::new() } else { REDACTED_SECRET.into() }
        }
        Self {
            resend_api_key: mask(&self.resend_api_key),
            postmark_server_token: mask(&self.postmark_server_token),
            brevo_api_key: mask(&self.brevo_api_key),
            ..self.clone()
        }
    }
}
