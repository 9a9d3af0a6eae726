//! Persistence seams. Everything in the core talks to these traits; `PgStore`
//! backs them with diesel and `MemoryStore` keeps rows in process.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use nearwatch_shared::errors::AppResult;

use crate::geo::Coordinates;
use crate::models::{
    Alert, EmailVerification, Feedback, NewAlert, NewEmailVerification, NewFeedback, NewReport,
    NewWebPushSubscription, Report, SoftDelete, SystemSettings, WebPushSubscription,
};

/// Whether soft-deleted rows take part in a read. Normal reads are `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Live,
    IncludeDeleted,
}

impl Visibility {
    pub fn from_flag(include_deleted: bool) -> Self {
        if include_deleted {
            Self::IncludeDeleted
        } else {
            Self::Live
        }
    }

    pub fn admits<T: SoftDelete>(self, row: &T) -> bool {
        self == Self::IncludeDeleted || !row.is_deleted()
    }
}

/// Reads and deletion for an entity that is hidden, not removed. Implemented
/// once per store for `Report`, `Alert` and `Feedback` so the deleted-row
/// filter cannot drift between them.
pub trait SoftDeleteRepo<T: SoftDelete>: Send + Sync {
    fn find(&self, external_id: Uuid, visibility: Visibility) -> AppResult<Option<T>>;

    /// Newest first.
    fn list_for_owner(&self, owner: &str, visibility: Visibility) -> AppResult<Vec<T>>;

    /// Live rows for `owner` created strictly after `since`.
    fn count_created_since(&self, owner: &str, since: DateTime<Utc>) -> AppResult<i64>;

    /// Returns false when no live row matched.
    fn soft_delete(&self, external_id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    /// Hard-delete rows whose deletion timestamp is older than `cutoff`.
    fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;
}

pub trait ReportStore: Send + Sync {
    fn insert_report(&self, report: NewReport) -> AppResult<Report>;

    /// Hard-delete every report created before `cutoff`, deleted or not.
    fn purge_reports_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;
}

pub trait AlertStore: Send + Sync {
    fn insert_alert(&self, alert: NewAlert) -> AppResult<Alert>;

    /// Persist every mutable column of an existing alert.
    fn save_alert(&self, alert: &Alert) -> AppResult<Alert>;

    /// Flip every alert registered under `email_hash` to verified.
    fn verify_alerts_with_hash(&self, email_hash: &str) -> AppResult<usize>;

    /// Live, verified alerts whose degree box around their center contains
    /// `point`. Coarse only; callers apply the exact distance check.
    fn match_candidates(&self, point: Coordinates) -> AppResult<Vec<Alert>>;
}

pub trait FeedbackStore: Send + Sync {
    fn insert_feedback(&self, feedback: NewFeedback) -> AppResult<Feedback>;
}

pub trait VerificationStore: Send + Sync {
    fn find_verification_by_hash(&self, email_hash: &str) -> AppResult<Option<EmailVerification>>;

    fn find_verification_by_token(&self, token: &str) -> AppResult<Option<EmailVerification>>;

    /// Insert unless a row for the same hash exists; either way return the
    /// row that is stored afterwards.
    fn insert_verification_if_absent(&self, row: NewEmailVerification) -> AppResult<EmailVerification>;

    /// Set the verified timestamp if it is not set yet.
    fn mark_verified(&self, id: i64, at: DateTime<Utc>) -> AppResult<EmailVerification>;

    fn purge_unverified_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;
}

pub trait PushSubscriptionStore: Send + Sync {
    fn subscriptions_for_owner(&self, owner: &str) -> AppResult<Vec<WebPushSubscription>>;

    /// Registers an endpoint. Registering a known endpoint again replaces its
    /// owner and keys.
    fn insert_subscription(&self, row: NewWebPushSubscription) -> AppResult<WebPushSubscription>;

    fn delete_subscription(&self, id: i64) -> AppResult<bool>;
}

pub trait SettingsStore: Send + Sync {
    /// The singleton row, or defaults when it has never been written.
    fn load_settings(&self) -> AppResult<SystemSettings>;

    fn save_settings(&self, settings: &SystemSettings) -> AppResult<SystemSettings>;
}

/// Every persistence capability the services need.
pub trait Store:
    SoftDeleteRepo<Report>
    + SoftDeleteRepo<Alert>
    + SoftDeleteRepo<Feedback>
    + ReportStore
    + AlertStore
    + FeedbackStore
    + VerificationStore
    + PushSubscriptionStore
    + SettingsStore
{
}

impl<S> Store for S where
    S: SoftDeleteRepo<Report>
        + SoftDeleteRepo<Alert>
        + SoftDeleteRepo<Feedback>
        + ReportStore
        + AlertStore
        + FeedbackStore
        + VerificationStore
        + PushSubscriptionStore
        + SettingsStore
{
}
