use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use nearwatch_shared::errors::{AppError, AppResult, ErrorCode};
use nearwatch_shared::types::job::Job;

use crate::gate::{Caller, Submission, SubmissionGate, SubmissionKind};
use crate::geo::Coordinates;
use crate::models::{Feedback, NewFeedback, NewReport, Report};
use crate::store::{SoftDeleteRepo, Store};
use crate::Committed;

#[derive(Debug, Clone)]
pub struct NewReportRequest {
    pub reporter_identifier: String,
    pub location: Coordinates,
    pub reporter_location: Option<Coordinates>,
    pub message: Option<String>,
    pub is_emergency: bool,
}

#[derive(Debug, Clone)]
pub struct NewFeedbackRequest {
    pub owner_identifier: String,
    pub message: String,
}

fn non_blank(message: Option<&str>) -> Option<String> {
    message.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string)
}

pub struct ReportService {
    store: Arc<dyn Store>,
    gate: Arc<SubmissionGate>,
}

impl ReportService {
    pub fn new(store: Arc<dyn Store>, gate: Arc<SubmissionGate>) -> Self {
        Self { store, gate }
    }

    /// Gate, persist, and schedule the notification job for a report.
    pub fn submit(&self, request: NewReportRequest, caller: Caller) -> AppResult<Committed<Report>> {
        let submission = Submission::new(SubmissionKind::Report, caller, &request.reporter_identifier)
            .message(request.message.as_deref())
            .location(request.location)
            .reporter_location(request.reporter_location);
        self.gate.validate(&submission)?;

        let report = self.store.insert_report(NewReport {
            external_id: Uuid::new_v4(),
            latitude: request.location.latitude,
            longitude: request.location.longitude,
            message: non_blank(request.message.as_deref()),
            reporter_latitude: request.reporter_location.map(|c| c.latitude),
            reporter_longitude: request.reporter_location.map(|c| c.longitude),
            is_emergency: request.is_emergency,
            reporter_identifier: request.reporter_identifier.trim().to_string(),
            created_at: Utc::now(),
        })?;

        tracing::info!(
            report_id = %report.external_id,
            emergency = report.is_emergency,
            "report submitted"
        );
        let jobs = vec![Job::notify_report(report.external_id)];
        Ok(Committed::new(report, jobs))
    }

    pub fn soft_delete(&self, external_id: Uuid) -> AppResult<()> {
        if !SoftDeleteRepo::<Report>::soft_delete(&*self.store, external_id, Utc::now())? {
            return Err(AppError::new(ErrorCode::ReportNotFound, "report not found"));
        }
        tracing::info!(report_id = %external_id, "report deleted");
        Ok(())
    }
}

pub struct FeedbackService {
    store: Arc<dyn Store>,
    gate: Arc<SubmissionGate>,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn Store>, gate: Arc<SubmissionGate>) -> Self {
        Self { store, gate }
    }

    pub fn submit(&self, request: NewFeedbackRequest, caller: Caller) -> AppResult<Feedback> {
        let message = non_blank(Some(request.message.as_str()))
            .ok_or_else(|| AppError::bad_request("Feedback message must not be empty."))?;

        let submission = Submission::new(SubmissionKind::Feedback, caller, &request.owner_identifier)
            .message(Some(message.as_str()));
        self.gate.validate(&submission)?;

        let feedback = self.store.insert_feedback(NewFeedback {
            external_id: Uuid::new_v4(),
            message,
            owner_identifier: request.owner_identifier.trim().to_string(),
            created_at: Utc::now(),
        })?;

        tracing::info!(feedback_id = %feedback.external_id, "feedback submitted");
        Ok(feedback)
    }

    pub fn soft_delete(&self, external_id: Uuid) -> AppResult<()> {
        if !SoftDeleteRepo::<Feedback>::soft_delete(&*self.store, external_id, Utc::now())? {
            return Err(AppError::new(ErrorCode::FeedbackNotFound, "feedback not found"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsCache;
    use crate::store::{MemoryStore, Visibility};
    use nearwatch_shared::errors::Rejection;

    const DEVICE: &str = "device-0001";

    fn services() -> (Arc<MemoryStore>, ReportService, FeedbackService) {
        let store = Arc::new(MemoryStore::new());
        let settings = Arc::new(SettingsCache::new(store.clone()));
        let gate = Arc::new(SubmissionGate::new(store.clone(), settings));
        (
            store.clone(),
            ReportService::new(store.clone(), gate.clone()),
            FeedbackService::new(store, gate),
        )
    }

    fn report_request(message: Option<&str>) -> NewReportRequest {
        NewReportRequest {
            reporter_identifier: DEVICE.into(),
            location: Coordinates::new(40.0, -74.0),
            reporter_location: Some(Coordinates::new(40.0, -74.01)),
            message: message.map(Into::into),
            is_emergency: false,
        }
    }

    #[test]
    fn report_schedules_notification() {
        let (_, reports, _) = services();
        let committed = reports.submit(report_request(Some("  ")), Caller::Public).unwrap();
        assert_eq!(committed.record.message, None);
        assert_eq!(committed.jobs, vec![Job::notify_report(committed.record.external_id)]);
    }

    #[test]
    fn rejected_report_is_not_persisted() {
        let (store, reports, _) = services();
        let err = reports
            .submit(report_request(Some("visit www.evil.com")), Caller::Public)
            .unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::LinkNotAllowed));
        let stored = SoftDeleteRepo::<Report>::list_for_owner(&*store, DEVICE, Visibility::IncludeDeleted)
            .unwrap();
        assert!(stored.is_empty());

        assert!(reports.submit(report_request(Some("visit evil")), Caller::Public).is_ok());
    }

    #[test]
    fn deleted_report_frees_the_cooldown() {
        let (_, reports, _) = services();
        let first = reports.submit(report_request(None), Caller::Public).unwrap();
        let err = reports.submit(report_request(None), Caller::Public).unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::CooldownActive));

        reports.soft_delete(first.record.external_id).unwrap();
        assert!(reports.submit(report_request(None), Caller::Public).is_ok());

        let err = reports.soft_delete(first.record.external_id).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ReportNotFound);
    }

    #[test]
    fn feedback_has_its_own_cooldown() {
        let (_, reports, feedback) = services();
        reports.submit(report_request(None), Caller::Public).unwrap();

        let request = NewFeedbackRequest {
            owner_identifier: DEVICE.into(),
            message: "Great app".into(),
        };
        feedback.submit(request.clone(), Caller::Public).unwrap();
        let err = feedback.submit(request, Caller::Public).unwrap_err();
        assert_eq!(err.rejection(), Some(Rejection::CooldownActive));
        assert!(err.to_string().contains("feedback"));
    }
}
