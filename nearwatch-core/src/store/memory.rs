use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use nearwatch_shared::errors::{AppError, AppResult};

use super::{
    AlertStore, FeedbackStore, PushSubscriptionStore, ReportStore, SettingsStore, SoftDeleteRepo,
    VerificationStore, Visibility,
};
use crate::geo::{in_degree_box, Coordinates};
use crate::models::{
    Alert, EmailVerification, Feedback, NewAlert, NewEmailVerification, NewFeedback, NewReport,
    NewWebPushSubscription, Report, SoftDelete, SystemSettings, WebPushSubscription,
};

#[derive(Default)]
struct Tables {
    last_id: i64,
    reports: Vec<Report>,
    alerts: Vec<Alert>,
    feedback: Vec<Feedback>,
    verifications: Vec<EmailVerification>,
    subscriptions: Vec<WebPushSubscription>,
    settings: Option<SystemSettings>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

/// In-process store with the same semantics as `PgStore`. Used by tests and
/// for running the pipeline without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: SystemSettings) -> Self {
        let store = Self::default();
        store.tables.lock().settings = Some(settings);
        store
    }
}

fn find_row<T: SoftDelete>(rows: &[T], external_id: Uuid, visibility: Visibility) -> Option<T> {
    rows.iter()
        .find(|r| r.external_id() == external_id && visibility.admits(*r))
        .cloned()
}

fn owner_rows<T: SoftDelete>(rows: &[T], owner: &str, visibility: Visibility) -> Vec<T> {
    let mut found: Vec<T> = rows
        .iter()
        .filter(|r| r.owner() == owner && visibility.admits(*r))
        .cloned()
        .collect();
    found.sort_by_key(|r| std::cmp::Reverse(r.created_at()));
    found
}

fn count_since<T: SoftDelete>(rows: &[T], owner: &str, since: DateTime<Utc>) -> i64 {
    rows.iter()
        .filter(|r| r.owner() == owner && !r.is_deleted() && r.created_at() > since)
        .count() as i64
}

fn mark_row<T: SoftDelete>(rows: &mut [T], external_id: Uuid, at: DateTime<Utc>) -> bool {
    match rows
        .iter_mut()
        .find(|r| r.external_id() == external_id && !r.is_deleted())
    {
        Some(row) => {
            row.mark_deleted(at);
            true
        }
        None => false,
    }
}

fn purge_rows<T: SoftDelete>(rows: &mut Vec<T>, cutoff: DateTime<Utc>) -> usize {
    let before = rows.len();
    rows.retain(|r| !matches!(r.deleted_at(), Some(at) if at < cutoff));
    before - rows.len()
}

macro_rules! memory_soft_delete_repo {
    ($model:ty, $table:ident) => {
        impl SoftDeleteRepo<$model> for MemoryStore {
            fn find(&self, external_id: Uuid, visibility: Visibility) -> AppResult<Option<$model>> {
                Ok(find_row(&self.tables.lock().$table, external_id, visibility))
            }

            fn list_for_owner(&self, owner: &str, visibility: Visibility) -> AppResult<Vec<$model>> {
                Ok(owner_rows(&self.tables.lock().$table, owner, visibility))
            }

            fn count_created_since(&self, owner: &str, since: DateTime<Utc>) -> AppResult<i64> {
                Ok(count_since(&self.tables.lock().$table, owner, since))
            }

            fn soft_delete(&self, external_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
                Ok(mark_row(&mut self.tables.lock().$table, external_id, at))
            }

            fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
                Ok(purge_rows(&mut self.tables.lock().$table, cutoff))
            }
        }
    };
}

memory_soft_delete_repo!(Report, reports);
memory_soft_delete_repo!(Alert, alerts);
memory_soft_delete_repo!(Feedback, feedback);

impl ReportStore for MemoryStore {
    fn insert_report(&self, new: NewReport) -> AppResult<Report> {
        let mut tables = self.tables.lock();
        let report = Report {
            id: tables.next_id(),
            external_id: new.external_id,
            latitude: new.latitude,
            longitude: new.longitude,
            message: new.message,
            reporter_latitude: new.reporter_latitude,
            reporter_longitude: new.reporter_longitude,
            is_emergency: new.is_emergency,
            reporter_identifier: new.reporter_identifier,
            created_at: new.created_at,
            deleted_at: None,
        };
        tables.reports.push(report.clone());
        Ok(report)
    }

    fn purge_reports_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut tables = self.tables.lock();
        let before = tables.reports.len();
        tables.reports.retain(|r| r.created_at >= cutoff);
        Ok(before - tables.reports.len())
    }
}

impl AlertStore for MemoryStore {
    fn insert_alert(&self, new: NewAlert) -> AppResult<Alert> {
        let mut tables = self.tables.lock();
        let alert = Alert {
            id: tables.next_id(),
            external_id: new.external_id,
            latitude: new.latitude,
            longitude: new.longitude,
            radius_km: new.radius_km,
            message: new.message,
            owner_identifier: new.owner_identifier,
            encrypted_email: new.encrypted_email,
            email_hash: new.email_hash,
            verified: new.verified,
            use_email: new.use_email,
            use_push: new.use_push,
            created_at: new.created_at,
            deleted_at: None,
        };
        tables.alerts.push(alert.clone());
        Ok(alert)
    }

    fn save_alert(&self, alert: &Alert) -> AppResult<Alert> {
        let mut tables = self.tables.lock();
        let slot = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| AppError::Database(diesel::result::Error::NotFound))?;
        *slot = alert.clone();
        Ok(alert.clone())
    }

    fn verify_alerts_with_hash(&self, email_hash: &str) -> AppResult<usize> {
        let mut tables = self.tables.lock();
        let mut flipped = 0;
        for alert in tables
            .alerts
            .iter_mut()
            .filter(|a| a.email_hash.as_deref() == Some(email_hash))
        {
            alert.verified = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    fn match_candidates(&self, point: Coordinates) -> AppResult<Vec<Alert>> {
        Ok(self
            .tables
            .lock()
            .alerts
            .iter()
            .filter(|a| !a.is_deleted() && a.verified)
            .filter(|a| in_degree_box(a.center(), a.radius_km, point))
            .cloned()
            .collect())
    }
}

impl FeedbackStore for MemoryStore {
    fn insert_feedback(&self, new: NewFeedback) -> AppResult<Feedback> {
        let mut tables = self.tables.lock();
        let feedback = Feedback {
            id: tables.next_id(),
            external_id: new.external_id,
            message: new.message,
            owner_identifier: new.owner_identifier,
            created_at: new.created_at,
            deleted_at: None,
        };
        tables.feedback.push(feedback.clone());
        Ok(feedback)
    }
}

impl VerificationStore for MemoryStore {
    fn find_verification_by_hash(&self, email_hash: &str) -> AppResult<Option<EmailVerification>> {
        Ok(self
            .tables
            .lock()
            .verifications
            .iter()
            .find(|v| v.email_hash == email_hash)
            .cloned())
    }

    fn find_verification_by_token(&self, token: &str) -> AppResult<Option<EmailVerification>> {
        Ok(self
            .tables
            .lock()
            .verifications
            .iter()
            .find(|v| v.token == token)
            .cloned())
    }

    fn insert_verification_if_absent(&self, new: NewEmailVerification) -> AppResult<EmailVerification> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.verifications.iter().find(|v| v.email_hash == new.email_hash) {
            return Ok(existing.clone());
        }
        let row = EmailVerification {
            id: tables.next_id(),
            email_hash: new.email_hash,
            token: new.token,
            created_at: new.created_at,
            verified_at: None,
        };
        tables.verifications.push(row.clone());
        Ok(row)
    }

    fn mark_verified(&self, id: i64, at: DateTime<Utc>) -> AppResult<EmailVerification> {
        let mut tables = self.tables.lock();
        let row = tables
            .verifications
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| AppError::Database(diesel::result::Error::NotFound))?;
        if row.verified_at.is_none() {
            row.verified_at = Some(at);
        }
        Ok(row.clone())
    }

    fn purge_unverified_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut tables = self.tables.lock();
        let before = tables.verifications.len();
        tables
            .verifications
            .retain(|v| v.verified_at.is_some() || v.created_at >= cutoff);
        Ok(before - tables.verifications.len())
    }
}

impl PushSubscriptionStore for MemoryStore {
    fn subscriptions_for_owner(&self, owner: &str) -> AppResult<Vec<WebPushSubscription>> {
        Ok(self
            .tables
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.owner_identifier == owner)
            .cloned()
            .collect())
    }

    fn insert_subscription(&self, new: NewWebPushSubscription) -> AppResult<WebPushSubscription> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.subscriptions.iter_mut().find(|s| s.endpoint == new.endpoint) {
            existing.owner_identifier = new.owner_identifier;
            existing.p256dh = new.p256dh;
            existing.auth = new.auth;
            return Ok(existing.clone());
        }
        let row = WebPushSubscription {
            id: tables.next_id(),
            owner_identifier: new.owner_identifier,
            endpoint: new.endpoint,
            p256dh: new.p256dh,
            auth: new.auth,
            created_at: new.created_at,
        };
        tables.subscriptions.push(row.clone());
        Ok(row)
    }

    fn delete_subscription(&self, id: i64) -> AppResult<bool> {
        let mut tables = self.tables.lock();
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| s.id != id);
        Ok(tables.subscriptions.len() < before)
    }
}

impl SettingsStore for MemoryStore {
    fn load_settings(&self) -> AppResult<SystemSettings> {
        Ok(self.tables.lock().settings.clone().unwrap_or_default())
    }

    fn save_settings(&self, settings: &SystemSettings) -> AppResult<SystemSettings> {
        self.tables.lock().settings = Some(settings.clone());
        Ok(settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_report(owner: &str, created_at: DateTime<Utc>) -> NewReport {
        NewReport {
            external_id: Uuid::new_v4(),
            latitude: 40.0,
            longitude: -74.0,
            message: None,
            reporter_latitude: None,
            reporter_longitude: None,
            is_emergency: false,
            reporter_identifier: owner.into(),
            created_at,
        }
    }

    #[test]
    fn soft_deleted_rows_need_include_deleted() {
        let store = MemoryStore::new();
        let report = store.insert_report(new_report("device-1234", Utc::now())).unwrap();

        assert!(SoftDeleteRepo::<Report>::soft_delete(&store, report.external_id, Utc::now()).unwrap());
        assert!(!SoftDeleteRepo::<Report>::soft_delete(&store, report.external_id, Utc::now()).unwrap());

        let live = SoftDeleteRepo::<Report>::find(&store, report.external_id, Visibility::Live).unwrap();
        assert!(live.is_none());
        let any = SoftDeleteRepo::<Report>::find(&store, report.external_id, Visibility::IncludeDeleted)
            .unwrap();
        assert!(any.unwrap().deleted_at.is_some());
    }

    #[test]
    fn count_ignores_deleted_and_older_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_report(new_report("device-1234", now - Duration::minutes(30))).unwrap();
        let recent = store.insert_report(new_report("device-1234", now - Duration::minutes(1))).unwrap();
        store.insert_report(new_report("device-9999", now)).unwrap();

        let since = now - Duration::minutes(10);
        assert_eq!(SoftDeleteRepo::<Report>::count_created_since(&store, "device-1234", since).unwrap(), 1);

        SoftDeleteRepo::<Report>::soft_delete(&store, recent.external_id, now).unwrap();
        assert_eq!(SoftDeleteRepo::<Report>::count_created_since(&store, "device-1234", since).unwrap(), 0);
    }

    #[test]
    fn verification_insert_keeps_first_row_per_hash() {
        let store = MemoryStore::new();
        let first = store
            .insert_verification_if_absent(NewEmailVerification {
                email_hash: "h".into(),
                token: "t1".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        let second = store
            .insert_verification_if_absent(NewEmailVerification {
                email_hash: "h".into(),
                token: "t2".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(first, second);
        assert!(store.find_verification_by_token("t2").unwrap().is_none());
    }

    #[test]
    fn settings_default_until_saved() {
        let store = MemoryStore::new();
        assert_eq!(store.load_settings().unwrap(), SystemSettings::default());

        let changed = SystemSettings {
            cooldown_minutes: 5,
            ..SystemSettings::default()
        };
        store.save_settings(&changed).unwrap();
        assert_eq!(store.load_settings().unwrap().cooldown_minutes, 5);
    }

    #[test]
    fn re_registering_an_endpoint_replaces_it() {
        let store = MemoryStore::new();
        let sub = |owner: &str, auth: &str| NewWebPushSubscription {
            owner_identifier: owner.into(),
            endpoint: "https://push.example/e1".into(),
            p256dh: "key".into(),
            auth: auth.into(),
            created_at: Utc::now(),
        };
        let first = store.insert_subscription(sub("device-1234", "a1")).unwrap();
        let second = store.insert_subscription(sub("device-5678", "a2")).unwrap();

        assert_eq!(first.id, second.id);
        assert!(store.subscriptions_for_owner("device-1234").unwrap().is_empty());
        assert_eq!(store.subscriptions_for_owner("device-5678").unwrap()[0].auth, "a2");
    }
}
