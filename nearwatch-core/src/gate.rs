//! Anti-spam checks run before any report, alert, or feedback is persisted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nearwatch_shared::errors::{AppResult, Rejection, ValidationError};

use crate::geo::{haversine_km, miles_to_km, Coordinates};
use crate::models::{Alert, Feedback, Report, SystemSettings};
use crate::settings::SettingsCache;
use crate::store::{SoftDeleteRepo, Store};

/// Substrings that mark a message as carrying a link. Matched case-sensitively.
const LINK_MARKERS: [&str; 3] = ["http://", "https://", "www."];

/// Width of every identifier column.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Report,
    Alert,
    AlertUpdate,
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Caller {
    #[default]
    Public,
    Admin,
}

impl Caller {
    pub fn is_admin(self) -> bool {
        self == Caller::Admin
    }
}

#[derive(Debug, Clone)]
pub struct Submission<'a> {
    pub kind: SubmissionKind,
    pub caller: Caller,
    pub identifier: &'a str,
    pub message: Option<&'a str>,
    pub location: Option<Coordinates>,
    pub reporter_location: Option<Coordinates>,
}

impl<'a> Submission<'a> {
    pub fn new(kind: SubmissionKind, caller: Caller, identifier: &'a str) -> Self {
        Self {
            kind,
            caller,
            identifier,
            message: None,
            location: None,
            reporter_location: None,
        }
    }

    pub fn message(mut self, message: Option<&'a str>) -> Self {
        self.message = message;
        self
    }

    pub fn location(mut self, location: Coordinates) -> Self {
        self.location = Some(location);
        self
    }

    pub fn reporter_location(mut self, location: Option<Coordinates>) -> Self {
        self.reporter_location = location;
        self
    }
}

pub struct SubmissionGate {
    store: Arc<dyn Store>,
    settings: Arc<SettingsCache>,
}

impl SubmissionGate {
    pub fn new(store: Arc<dyn Store>, settings: Arc<SettingsCache>) -> Self {
        Self { store, settings }
    }

    pub fn validate(&self, submission: &Submission<'_>) -> AppResult<()> {
        self.validate_at(submission, Utc::now())
    }

    pub fn validate_at(&self, submission: &Submission<'_>, now: DateTime<Utc>) -> AppResult<()> {
        let settings = self.settings.get()?;
        let admin = submission.caller.is_admin();

        if !admin {
            check_identifier(submission.identifier, &settings)?;
            check_links(submission.message)?;
        }
        check_identifier_fits(submission.identifier)?;
        check_coordinates(submission)?;
        self.check_cooldown(submission, &settings, now)?;

        if !admin {
            match submission.kind {
                SubmissionKind::Report => check_distance(submission, &settings)?,
                SubmissionKind::Alert => self.check_alert_quota(submission, &settings, now)?,
                SubmissionKind::AlertUpdate | SubmissionKind::Feedback => {}
            }
        }

        Ok(())
    }

    fn check_cooldown(
        &self,
        submission: &Submission<'_>,
        settings: &SystemSettings,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let identifier = submission.identifier.trim();
        if identifier.is_empty() || settings.cooldown_minutes <= 0 {
            return Ok(());
        }
        let since = now - settings.cooldown();

        let (recent, message) = match submission.kind {
            SubmissionKind::Report => (
                SoftDeleteRepo::<Report>::count_created_since(&*self.store, identifier, since)?,
                format!(
                    "You can only submit one report every {} minutes.",
                    settings.cooldown_minutes
                ),
            ),
            SubmissionKind::Feedback => (
                SoftDeleteRepo::<Feedback>::count_created_since(&*self.store, identifier, since)?,
                format!(
                    "You can only send feedback once every {} minutes.",
                    settings.cooldown_minutes
                ),
            ),
            // Alert creation is throttled by the quota instead.
            SubmissionKind::Alert | SubmissionKind::AlertUpdate => return Ok(()),
        };

        if recent > 0 {
            return Err(ValidationError::new(Rejection::CooldownActive, message).into());
        }
        Ok(())
    }

    fn check_alert_quota(
        &self,
        submission: &Submission<'_>,
        settings: &SystemSettings,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let since = now - settings.cooldown();
        let existing = SoftDeleteRepo::<Alert>::count_created_since(
            &*self.store,
            submission.identifier.trim(),
            since,
        )?;
        if existing >= i64::from(settings.alert_limit_count) {
            return Err(ValidationError::new(
                Rejection::AlertQuotaExceeded,
                format!(
                    "You can only create {} alerts every {} minutes.",
                    settings.alert_limit_count, settings.cooldown_minutes
                ),
            )
            .into());
        }
        Ok(())
    }
}

fn check_identifier(identifier: &str, settings: &SystemSettings) -> Result<(), ValidationError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ValidationError::new(
            Rejection::IdentifierMissing,
            "A device identifier is required.",
        ));
    }
    let min = usize::try_from(settings.min_identifier_length).unwrap_or(0);
    if identifier.chars().count() < min {
        return Err(ValidationError::new(
            Rejection::IdentifierTooShort,
            format!("The device identifier must be at least {min} characters."),
        ));
    }
    Ok(())
}

fn check_identifier_fits(identifier: &str) -> Result<(), ValidationError> {
    if identifier.trim().chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::new(
            Rejection::IdentifierTooLong,
            format!("The device identifier must be at most {MAX_IDENTIFIER_LENGTH} characters."),
        ));
    }
    Ok(())
}

fn check_links(message: Option<&str>) -> Result<(), ValidationError> {
    let Some(message) = message else {
        return Ok(());
    };
    if LINK_MARKERS.iter().any(|marker| message.contains(marker)) {
        return Err(ValidationError::new(
            Rejection::LinkNotAllowed,
            "Links are not allowed in messages.",
        ));
    }
    Ok(())
}

fn check_coordinates(submission: &Submission<'_>) -> Result<(), ValidationError> {
    let invalid = [submission.location, submission.reporter_location]
        .into_iter()
        .flatten()
        .any(|c| !c.is_valid());
    if invalid {
        return Err(ValidationError::new(
            Rejection::InvalidCoordinates,
            "Coordinates are out of range.",
        ));
    }
    Ok(())
}

fn check_distance(submission: &Submission<'_>, settings: &SystemSettings) -> Result<(), ValidationError> {
    let too_far = || {
        ValidationError::new(
            Rejection::ReportTooFar,
            format!(
                "You must be within {} miles of the reported location.",
                settings.max_report_distance_miles
            ),
        )
    };

    let Some(reporter) = submission.reporter_location else {
        return Err(ValidationError::new(
            Rejection::ReporterLocationMissing,
            "Your current location is required to submit a report.",
        ));
    };
    let Some(location) = submission.location else {
        return Err(too_far());
    };

    let limit_km = miles_to_km(settings.max_report_distance_miles);
    if haversine_km(reporter, location) > limit_km {
        return Err(too_far());
    }
    Ok(())
}
