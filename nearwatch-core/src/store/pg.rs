use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Float8;
use uuid::Uuid;

use nearwatch_shared::clients::db::{checkout, DbConn, DbPool};
use nearwatch_shared::errors::AppResult;

use super::{
    AlertStore, FeedbackStore, PushSubscriptionStore, ReportStore, SettingsStore, SoftDeleteRepo,
    VerificationStore, Visibility,
};
use crate::geo::{longitude_km_per_degree, Coordinates, KM_PER_DEGREE};
use crate::models::{
    Alert, EmailVerification, Feedback, NewAlert, NewEmailVerification, NewFeedback, NewReport,
    NewWebPushSubscription, Report, SystemSettings, WebPushSubscription, SETTINGS_ROW_ID,
};
use crate::schema::{alerts, email_verifications, feedback, reports, system_settings, web_push_subscriptions};

/// Postgres-backed store. Each call checks out its own pooled connection.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> AppResult<DbConn> {
        checkout(&self.pool)
    }
}

macro_rules! pg_soft_delete_repo {
    ($model:ty, $table:ident, $owner:ident) => {
        impl SoftDeleteRepo<$model> for PgStore {
            fn find(&self, external_id: Uuid, visibility: Visibility) -> AppResult<Option<$model>> {
                let mut conn = self.conn()?;
                let mut query = $table::table
                    .filter($table::external_id.eq(external_id))
                    .into_boxed();
                if visibility == Visibility::Live {
                    query = query.filter($table::deleted_at.is_null());
                }
                Ok(query.first::<$model>(&mut conn).optional()?)
            }

            fn list_for_owner(&self, owner: &str, visibility: Visibility) -> AppResult<Vec<$model>> {
                let mut conn = self.conn()?;
                let mut query = $table::table
                    .filter($table::$owner.eq(owner))
                    .order($table::created_at.desc())
                    .into_boxed();
                if visibility == Visibility::Live {
                    query = query.filter($table::deleted_at.is_null());
                }
                Ok(query.load::<$model>(&mut conn)?)
            }

            fn count_created_since(&self, owner: &str, since: DateTime<Utc>) -> AppResult<i64> {
                let mut conn = self.conn()?;
                let count = $table::table
                    .filter($table::$owner.eq(owner))
                    .filter($table::deleted_at.is_null())
                    .filter($table::created_at.gt(since))
                    .count()
                    .get_result(&mut conn)?;
                Ok(count)
            }

            fn soft_delete(&self, external_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
                let mut conn = self.conn()?;
                let updated = diesel::update(
                    $table::table
                        .filter($table::external_id.eq(external_id))
                        .filter($table::deleted_at.is_null()),
                )
                .set($table::deleted_at.eq(at))
                .execute(&mut conn)?;
                Ok(updated > 0)
            }

            fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
                let mut conn = self.conn()?;
                let deleted = diesel::delete($table::table.filter($table::deleted_at.lt(cutoff)))
                    .execute(&mut conn)?;
                Ok(deleted)
            }
        }
    };
}

pg_soft_delete_repo!(Report, reports, reporter_identifier);
pg_soft_delete_repo!(Alert, alerts, owner_identifier);
pg_soft_delete_repo!(Feedback, feedback, owner_identifier);

impl ReportStore for PgStore {
    fn insert_report(&self, new: NewReport) -> AppResult<Report> {
        let mut conn = self.conn()?;
        let report = diesel::insert_into(reports::table)
            .values(&new)
            .get_result::<Report>(&mut conn)?;
        Ok(report)
    }

    fn purge_reports_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(reports::table.filter(reports::created_at.lt(cutoff)))
            .execute(&mut conn)?;
        Ok(deleted)
    }
}

/// Degree-box prefilter. `$3` is the kilometres per degree of longitude at
/// the report's latitude, so the box is evaluated without per-row trig.
const MATCH_CANDIDATES_SQL: &str = "\
    SELECT * FROM alerts \
    WHERE deleted_at IS NULL \
      AND verified = TRUE \
      AND abs(latitude - $1) <= radius_km / $4 \
      AND abs(longitude - $2) <= radius_km / $3";

impl AlertStore for PgStore {
    fn insert_alert(&self, new: NewAlert) -> AppResult<Alert> {
        let mut conn = self.conn()?;
        let alert = diesel::insert_into(alerts::table)
            .values(&new)
            .get_result::<Alert>(&mut conn)?;
        Ok(alert)
    }

    fn save_alert(&self, alert: &Alert) -> AppResult<Alert> {
        let mut conn = self.conn()?;
        let saved = diesel::update(alerts::table.find(alert.id))
            .set(alert)
            .get_result::<Alert>(&mut conn)?;
        Ok(saved)
    }

    fn verify_alerts_with_hash(&self, email_hash: &str) -> AppResult<usize> {
        let mut conn = self.conn()?;
        let updated = diesel::update(alerts::table.filter(alerts::email_hash.eq(email_hash)))
            .set(alerts::verified.eq(true))
            .execute(&mut conn)?;
        Ok(updated)
    }

    fn match_candidates(&self, point: Coordinates) -> AppResult<Vec<Alert>> {
        let mut conn = self.conn()?;
        let candidates = diesel::sql_query(MATCH_CANDIDATES_SQL)
            .bind::<Float8, _>(point.latitude)
            .bind::<Float8, _>(point.longitude)
            .bind::<Float8, _>(longitude_km_per_degree(point.latitude))
            .bind::<Float8, _>(KM_PER_DEGREE)
            .load::<Alert>(&mut conn)?;
        Ok(candidates)
    }
}

impl FeedbackStore for PgStore {
    fn insert_feedback(&self, new: NewFeedback) -> AppResult<Feedback> {
        let mut conn = self.conn()?;
        let row = diesel::insert_into(feedback::table)
            .values(&new)
            .get_result::<Feedback>(&mut conn)?;
        Ok(row)
    }
}

impl VerificationStore for PgStore {
    fn find_verification_by_hash(&self, email_hash: &str) -> AppResult<Option<EmailVerification>> {
        let mut conn = self.conn()?;
        let row = email_verifications::table
            .filter(email_verifications::email_hash.eq(email_hash))
            .first::<EmailVerification>(&mut conn)
            .optional()?;
        Ok(row)
    }

    fn find_verification_by_token(&self, token: &str) -> AppResult<Option<EmailVerification>> {
        let mut conn = self.conn()?;
        let row = email_verifications::table
            .filter(email_verifications::token.eq(token))
            .first::<EmailVerification>(&mut conn)
            .optional()?;
        Ok(row)
    }

    fn insert_verification_if_absent(&self, new: NewEmailVerification) -> AppResult<EmailVerification> {
        let mut conn = self.conn()?;
        diesel::insert_into(email_verifications::table)
            .values(&new)
            .on_conflict(email_verifications::email_hash)
            .do_nothing()
            .execute(&mut conn)?;

        let row = email_verifications::table
            .filter(email_verifications::email_hash.eq(&new.email_hash))
            .first::<EmailVerification>(&mut conn)?;
        Ok(row)
    }

    fn mark_verified(&self, id: i64, at: DateTime<Utc>) -> AppResult<EmailVerification> {
        let mut conn = self.conn()?;
        diesel::update(
            email_verifications::table
                .filter(email_verifications::id.eq(id))
                .filter(email_verifications::verified_at.is_null()),
        )
        .set(email_verifications::verified_at.eq(at))
        .execute(&mut conn)?;

        let row = email_verifications::table
            .find(id)
            .first::<EmailVerification>(&mut conn)?;
        Ok(row)
    }

    fn purge_unverified_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(
            email_verifications::table
                .filter(email_verifications::verified_at.is_null())
                .filter(email_verifications::created_at.lt(cutoff)),
        )
        .execute(&mut conn)?;
        Ok(deleted)
    }
}

impl PushSubscriptionStore for PgStore {
    fn subscriptions_for_owner(&self, owner: &str) -> AppResult<Vec<WebPushSubscription>> {
        let mut conn = self.conn()?;
        let rows = web_push_subscriptions::table
            .filter(web_push_subscriptions::owner_identifier.eq(owner))
            .load::<WebPushSubscription>(&mut conn)?;
        Ok(rows)
    }

    fn insert_subscription(&self, new: NewWebPushSubscription) -> AppResult<WebPushSubscription> {
        let mut conn = self.conn()?;
        let row = diesel::insert_into(web_push_subscriptions::table)
            .values(&new)
            .on_conflict(web_push_subscriptions::endpoint)
            .do_update()
            .set((
                web_push_subscriptions::owner_identifier.eq(&new.owner_identifier),
                web_push_subscriptions::p256dh.eq(&new.p256dh),
                web_push_subscriptions::auth.eq(&new.auth),
            ))
            .get_result::<WebPushSubscription>(&mut conn)?;
        Ok(row)
    }

    fn delete_subscription(&self, id: i64) -> AppResult<bool> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(web_push_subscriptions::table.find(id)).execute(&mut conn)?;
        Ok(deleted > 0)
    }
}

impl SettingsStore for PgStore {
    fn load_settings(&self) -> AppResult<SystemSettings> {
        let mut conn = self.conn()?;
        let row = system_settings::table
            .find(SETTINGS_ROW_ID)
            .first::<SystemSettings>(&mut conn)
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    fn save_settings(&self, settings: &SystemSettings) -> AppResult<SystemSettings> {
        let mut conn = self.conn()?;
        let row = SystemSettings {
            id: SETTINGS_ROW_ID,
            ..settings.clone()
        };
        let saved = diesel::insert_into(system_settings::table)
            .values(&row)
            .on_conflict(system_settings::id)
            .do_update()
            .set(&row)
            .get_result::<SystemSettings>(&mut conn)?;
        Ok(saved)
    }
}
