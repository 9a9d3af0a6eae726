//! Alert CRUD and the email verification state machine.
//!
//! An alert is usable by the matcher only once `verified` is set. Push-only
//! alerts are verified on creation. Email alerts are verified when their
//! address hash has a confirmed `EmailVerification` row, either already or
//! after the owner follows the link mailed by the verification job.

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

use nearwatch_shared::errors::{AppError, AppResult, ErrorCode, Rejection, ValidationError};
use nearwatch_shared::types::job::Job;

use crate::crypto::EmailCipher;
use crate::gate::{Caller, Submission, SubmissionGate, SubmissionKind};
use crate::geo::Coordinates;
use crate::models::{Alert, NewAlert, NewEmailVerification, SystemSettings};
use crate::privacy::email_hash;
use crate::settings::SettingsCache;
use crate::store::{SoftDeleteRepo, Store, Visibility};
use crate::Committed;

#[derive(Debug, Clone)]
pub struct NewAlertRequest {
    pub owner_identifier: String,
    pub location: Coordinates,
    pub radius_km: f64,
    pub message: String,
    pub email: Option<String>,
    pub use_email: bool,
    pub use_push: bool,
}

/// Replacement values for an existing alert. `email: None` keeps the stored
/// address; `Some("")` clears it.
#[derive(Debug, Clone)]
pub struct AlertChanges {
    pub location: Coordinates,
    pub radius_km: f64,
    pub message: String,
    pub email: Option<String>,
    pub use_email: bool,
    pub use_push: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub email_hash: String,
    pub alerts_verified: usize,
    pub already_verified: bool,
}

pub struct AlertLifecycleManager {
    store: Arc<dyn Store>,
    gate: Arc<SubmissionGate>,
    settings: Arc<SettingsCache>,
    cipher: Arc<dyn EmailCipher>,
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn normalized_email(email: Option<&str>) -> Option<&str> {
    email.map(str::trim).filter(|e| !e.is_empty())
}

fn checked_radius(radius_km: f64, settings: &SystemSettings) -> Result<f64, ValidationError> {
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(ValidationError::new(
            Rejection::InvalidRadius,
            "The alert radius must be greater than zero.",
        ));
    }
    Ok(radius_km.min(settings.max_alert_radius_km))
}

fn check_channels(use_email: bool, use_push: bool) -> AppResult<()> {
    if !use_email && !use_push {
        return Err(AppError::bad_request(
            "At least one notification channel must be enabled.",
        ));
    }
    Ok(())
}

fn email_required() -> AppError {
    ValidationError::new(
        Rejection::EmailRequired,
        "An email address is required for email notifications.",
    )
    .into()
}

fn alert_not_found() -> AppError {
    AppError::new(ErrorCode::AlertNotFound, "alert not found")
}

impl AlertLifecycleManager {
    pub fn new(
        store: Arc<dyn Store>,
        gate: Arc<SubmissionGate>,
        settings: Arc<SettingsCache>,
        cipher: Arc<dyn EmailCipher>,
    ) -> Self {
        Self {
            store,
            gate,
            settings,
            cipher,
        }
    }

    pub fn create(&self, request: NewAlertRequest, caller: Caller) -> AppResult<Committed<Alert>> {
        let submission = Submission::new(SubmissionKind::Alert, caller, &request.owner_identifier)
            .message(Some(request.message.as_str()))
            .location(request.location);
        self.gate.validate(&submission)?;

        let settings = self.settings.get()?;
        let radius_km = checked_radius(request.radius_km, &settings)?;
        check_channels(request.use_email, request.use_push)?;

        let email = normalized_email(request.email.as_deref());
        if request.use_email && email.is_none() {
            return Err(email_required());
        }

        let (encrypted_email, hash) = match email {
            Some(email) => (Some(self.cipher.encrypt(email)?), Some(email_hash(email))),
            None => (None, None),
        };

        let push_only = request.use_push && !request.use_email;
        let (verified, jobs) = match (&hash, push_only) {
            (_, true) | (None, _) => (true, Vec::new()),
            (Some(hash), false) => self.request_verification(hash, email)?,
        };

        let alert = self.store.insert_alert(NewAlert {
            external_id: Uuid::new_v4(),
            latitude: request.location.latitude,
            longitude: request.location.longitude,
            radius_km,
            message: request.message.trim().to_string(),
            owner_identifier: request.owner_identifier.trim().to_string(),
            encrypted_email,
            email_hash: hash,
            verified,
            use_email: request.use_email,
            use_push: request.use_push,
            created_at: Utc::now(),
        })?;

        tracing::info!(
            alert_id = %alert.external_id,
            verified = alert.verified,
            pending_jobs = jobs.len(),
            "alert created"
        );
        Ok(Committed::new(alert, jobs))
    }

    pub fn update(
        &self,
        external_id: Uuid,
        owner_identifier: &str,
        changes: AlertChanges,
        caller: Caller,
    ) -> AppResult<Committed<Alert>> {
        let mut alert = self.owned_alert(external_id, owner_identifier, caller)?;

        let submission = Submission::new(SubmissionKind::AlertUpdate, caller, owner_identifier)
            .message(Some(changes.message.as_str()))
            .location(changes.location);
        self.gate.validate(&submission)?;

        let settings = self.settings.get()?;
        let radius_km = checked_radius(changes.radius_km, &settings)?;
        check_channels(changes.use_email, changes.use_push)?;

        let was_push_only = alert.is_push_only();
        let mut new_plaintext = None;
        if let Some(raw) = changes.email.as_deref() {
            match normalized_email(Some(raw)) {
                Some(email) => {
                    let hash = email_hash(email);
                    if alert.email_hash.as_deref() != Some(hash.as_str()) {
                        alert.encrypted_email = Some(self.cipher.encrypt(email)?);
                        alert.email_hash = Some(hash);
                        new_plaintext = Some(email.to_string());
                    }
                }
                None => {
                    alert.encrypted_email = None;
                    alert.email_hash = None;
                }
            }
        }

        alert.latitude = changes.location.latitude;
        alert.longitude = changes.location.longitude;
        alert.radius_km = radius_km;
        alert.message = changes.message.trim().to_string();
        alert.use_email = changes.use_email;
        alert.use_push = changes.use_push;

        if alert.use_email && alert.email_hash.is_none() {
            return Err(email_required());
        }

        let mut jobs = Vec::new();
        if alert.is_push_only() {
            alert.verified = true;
        } else if new_plaintext.is_some() || was_push_only {
            // The address changed, or it is used for the first time.
            let plaintext = new_plaintext.or_else(|| self.decrypt_email(&alert));
            let hash = alert.email_hash.clone().unwrap_or_default();
            let (verified, pending) = self.request_verification(&hash, plaintext.as_deref())?;
            alert.verified = verified;
            jobs = pending;
        }

        let alert = self.store.save_alert(&alert)?;
        tracing::info!(
            alert_id = %alert.external_id,
            verified = alert.verified,
            pending_jobs = jobs.len(),
            "alert updated"
        );
        Ok(Committed::new(alert, jobs))
    }

    /// Confirm an address. Every alert sharing its hash becomes verified.
    /// A token that was already used succeeds again without changes.
    pub fn verify_email(&self, token: &str) -> AppResult<VerificationOutcome> {
        let token = token.trim();
        let row = match token {
            "" => None,
            token => self.store.find_verification_by_token(token)?,
        }
        .ok_or_else(|| {
            AppError::new(
                ErrorCode::VerificationTokenInvalid,
                "verification link is invalid",
            )
        })?;

        if row.is_verified() {
            return Ok(VerificationOutcome {
                email_hash: row.email_hash,
                alerts_verified: 0,
                already_verified: true,
            });
        }

        let row = self.store.mark_verified(row.id, Utc::now())?;
        let alerts_verified = self.store.verify_alerts_with_hash(&row.email_hash)?;
        tracing::info!(alerts_verified, "email address verified");

        Ok(VerificationOutcome {
            email_hash: row.email_hash,
            alerts_verified,
            already_verified: false,
        })
    }

    pub fn soft_delete(&self, external_id: Uuid, owner_identifier: &str, caller: Caller) -> AppResult<()> {
        self.owned_alert(external_id, owner_identifier, caller)?;
        if !SoftDeleteRepo::<Alert>::soft_delete(&*self.store, external_id, Utc::now())? {
            return Err(alert_not_found());
        }
        tracing::info!(alert_id = %external_id, "alert deleted");
        Ok(())
    }

    pub fn list_for_owner(&self, owner_identifier: &str, visibility: Visibility) -> AppResult<Vec<Alert>> {
        SoftDeleteRepo::<Alert>::list_for_owner(&*self.store, owner_identifier.trim(), visibility)
    }

    /// The alert's plaintext address, or `None` when there is none or it can
    /// no longer be decrypted.
    pub fn decrypt_email(&self, alert: &Alert) -> Option<String> {
        let blob = alert.encrypted_email.as_deref()?;
        let email = self.cipher.decrypt(blob);
        if email.is_none() {
            tracing::warn!(alert_id = %alert.external_id, "alert email could not be decrypted");
        }
        email
    }

    fn owned_alert(&self, external_id: Uuid, owner_identifier: &str, caller: Caller) -> AppResult<Alert> {
        let alert = SoftDeleteRepo::<Alert>::find(&*self.store, external_id, Visibility::Live)?
            .ok_or_else(alert_not_found)?;
        if !caller.is_admin() && alert.owner_identifier != owner_identifier.trim() {
            return Err(AppError::new(
                ErrorCode::NotAlertOwner,
                "alert belongs to another device",
            ));
        }
        Ok(alert)
    }

    /// Find or create the verification row for `hash`. Returns whether the
    /// address is already confirmed, and the email job to send otherwise.
    fn request_verification(&self, hash: &str, email: Option<&str>) -> AppResult<(bool, Vec<Job>)> {
        let row = match self.store.find_verification_by_hash(hash)? {
            Some(row) => row,
            None => self.store.insert_verification_if_absent(NewEmailVerification {
                email_hash: hash.to_string(),
                token: new_token(),
                created_at: Utc::now(),
            })?,
        };

        if row.is_verified() {
            return Ok((true, Vec::new()));
        }
        let jobs = match email {
            Some(email) => vec![Job::send_verification_email(email, row.token)],
            None => {
                tracing::warn!("no readable address for pending verification, email not sent");
                Vec::new()
            }
        };
        Ok((false, jobs))
    }
}
