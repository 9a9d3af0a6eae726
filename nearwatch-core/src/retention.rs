use std::sync::Arc;

use chrono::{DateTime, Utc};

use nearwatch_shared::errors::AppResult;

use crate::models::{Alert, Feedback};
use crate::settings::SettingsCache;
use crate::store::{SoftDeleteRepo, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reports: usize,
    pub alerts: usize,
    pub feedback: usize,
    pub verifications: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.reports + self.alerts + self.feedback + self.verifications
    }
}

/// Hard-deletes data older than the configured retention window:
/// reports by creation time, soft-deleted alerts and feedback by deletion
/// time, and verification rows that were never confirmed.
pub struct RetentionSweeper {
    store: Arc<dyn Store>,
    settings: Arc<SettingsCache>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn Store>, settings: Arc<SettingsCache>) -> Self {
        Self { store, settings }
    }

    pub fn sweep(&self) -> AppResult<SweepReport> {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let settings = self.settings.get()?;
        if settings.retention_days <= 0 {
            tracing::debug!("retention disabled, nothing swept");
            return Ok(SweepReport::default());
        }
        let cutoff = now - settings.retention();

        let report = SweepReport {
            reports: self.store.purge_reports_created_before(cutoff)?,
            alerts: SoftDeleteRepo::<Alert>::purge_deleted_before(&*self.store, cutoff)?,
            feedback: SoftDeleteRepo::<Feedback>::purge_deleted_before(&*self.store, cutoff)?,
            verifications: self.store.purge_unverified_before(cutoff)?,
        };

        tracing::info!(
            cutoff = %cutoff,
            reports = report.reports,
            alerts = report.alerts,
            feedback = report.feedback,
            verifications = report.verifications,
            "retention sweep finished"
        );
        Ok(report)
    }
}
