//! Per-report notification delivery, run from a background job.
//!
//! One run loads the report, finds matching alerts, sends a single email
//! batch through the provider fallback chain, then walks each matched
//! owner's push subscriptions. A failure for one push subscriber never stops
//! delivery to the others, and nothing already delivered is rolled back.

pub mod chain;
pub mod geocode;
pub mod push;
pub mod render;

pub use chain::{ChainError, ChainOutcome, FallbackChain, HttpProviderFactory, ProviderCredentials, ProviderFactory};
pub use geocode::{Geocoder, NominatimGeocoder};
pub use push::{PushError, PushPayload, PushSender, RelayPushSender};
pub use render::{MessageRenderer, RenderConfig};

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use nearwatch_shared::errors::AppError;

use crate::alerts::AlertLifecycleManager;
use crate::matching::MatchEngine;
use crate::models::{Alert, Report, SystemSettings};
use crate::settings::SettingsCache;
use crate::store::{SoftDeleteRepo, Store, Visibility};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("report {0} not found")]
    ReportNotFound(Uuid),

    #[error("failed to load system settings: {0}")]
    Settings(#[source] AppError),

    #[error("store error: {0}")]
    Store(#[from] AppError),

    #[error(transparent)]
    EmailDelivery(#[from] ChainError),
}

/// What one pipeline run delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub matched_alerts: usize,
    pub emails_sent: usize,
    pub emails_skipped: usize,
    pub email_provider: Option<&'static str>,
    pub email_failed: bool,
    pub pushes_sent: usize,
    pub pushes_failed: usize,
    pub subscriptions_pruned: usize,
}

/// Collaborators the pipeline is assembled from.
pub struct PipelineParts {
    pub store: Arc<dyn Store>,
    pub settings: Arc<SettingsCache>,
    pub alerts: Arc<AlertLifecycleManager>,
    pub providers: Arc<dyn ProviderFactory>,
    pub push: Arc<dyn PushSender>,
    pub geocoder: Arc<dyn Geocoder>,
    pub renderer: MessageRenderer,
}

pub struct NotificationPipeline {
    store: Arc<dyn Store>,
    settings: Arc<SettingsCache>,
    matcher: MatchEngine,
    alerts: Arc<AlertLifecycleManager>,
    providers: Arc<dyn ProviderFactory>,
    push: Arc<dyn PushSender>,
    geocoder: Arc<dyn Geocoder>,
    renderer: MessageRenderer,
}

impl NotificationPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            matcher: MatchEngine::new(parts.store.clone()),
            store: parts.store,
            settings: parts.settings,
            alerts: parts.alerts,
            providers: parts.providers,
            push: parts.push,
            geocoder: parts.geocoder,
            renderer: parts.renderer,
        }
    }

    /// Entry point for the notify-report job. Errors are logged here and
    /// returned so the job runner records the failure.
    pub async fn run(&self, report_id: Uuid) -> Result<DeliverySummary, PipelineError> {
        match self.deliver(report_id).await {
            Ok(summary) => {
                tracing::info!(
                    report_id = %report_id,
                    matched = summary.matched_alerts,
                    emails_sent = summary.emails_sent,
                    emails_skipped = summary.emails_skipped,
                    pushes_sent = summary.pushes_sent,
                    pushes_failed = summary.pushes_failed,
                    pruned = summary.subscriptions_pruned,
                    "report notifications delivered"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(report_id = %report_id, error = %e, "report notification failed");
                Err(e)
            }
        }
    }

    async fn deliver(&self, report_id: Uuid) -> Result<DeliverySummary, PipelineError> {
        let report = SoftDeleteRepo::<Report>::find(&*self.store, report_id, Visibility::Live)?
            .ok_or(PipelineError::ReportNotFound(report_id))?;
        let settings = self.settings.get().map_err(PipelineError::Settings)?;

        let matched = self.matcher.find_matching_alerts(report.location())?;
        let mut summary = DeliverySummary {
            matched_alerts: matched.len(),
            ..DeliverySummary::default()
        };
        if matched.is_empty() {
            return Ok(summary);
        }

        let email_failure = if settings.email_notifications_enabled {
            self.deliver_email(&report, &matched, &settings, &mut summary)
                .await
                .err()
        } else {
            None
        };

        if settings.push_notifications_enabled {
            self.deliver_push(&report, &matched, &mut summary).await;
        }

        if let Some(err) = email_failure {
            if summary.pushes_sent == 0 {
                return Err(err.into());
            }
            tracing::warn!(
                report_id = %report.external_id,
                error = %err,
                "email batch failed after push deliveries succeeded"
            );
            summary.email_failed = true;
        }
        Ok(summary)
    }

    async fn deliver_email(
        &self,
        report: &Report,
        matched: &[Alert],
        settings: &SystemSettings,
        summary: &mut DeliverySummary,
    ) -> Result<(), ChainError> {
        let recipients: Vec<&Alert> = matched.iter().filter(|a| a.use_email).collect();
        if recipients.is_empty() {
            return Ok(());
        }

        let address = self.geocoder.reverse(report.location()).await;
        let mut batch = Vec::with_capacity(recipients.len());
        for alert in recipients {
            match self.alerts.decrypt_email(alert) {
                Some(to) => batch.push(self.renderer.alert_email(to, alert, report, address.as_deref())),
                None => {
                    tracing::warn!(alert_id = %alert.external_id, "skipping email for alert without readable address");
                    summary.emails_skipped += 1;
                }
            }
        }

        let chain = self.providers.chain(settings);
        match chain.send(&batch).await? {
            ChainOutcome::Delivered { provider } => {
                summary.emails_sent = batch.len();
                summary.email_provider = Some(provider);
            }
            ChainOutcome::Unconfigured | ChainOutcome::NothingToSend => {}
        }
        Ok(())
    }

    async fn deliver_push(&self, report: &Report, matched: &[Alert], summary: &mut DeliverySummary) {
        let owners: BTreeSet<&str> = matched
            .iter()
            .filter(|a| a.use_push)
            .map(|a| a.owner_identifier.as_str())
            .collect();
        if owners.is_empty() {
            return;
        }

        let payload = self.renderer.push_payload(report);
        for owner in owners {
            let subscriptions = match self.store.subscriptions_for_owner(owner) {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load push subscriptions for owner");
                    continue;
                }
            };

            for subscription in subscriptions {
                match self.push.send(&subscription, &payload).await {
                    Ok(()) => {
                        summary.pushes_sent += 1;
                        counter!("notifications_push_total", "outcome" => "sent").increment(1);
                    }
                    Err(PushError::Gone { status }) => {
                        tracing::info!(subscription_id = subscription.id, status, "push endpoint gone, removing subscription");
                        counter!("notifications_push_total", "outcome" => "gone").increment(1);
                        match self.store.delete_subscription(subscription.id) {
                            Ok(_) => {
                                summary.subscriptions_pruned += 1;
                                counter!("push_subscriptions_pruned_total").increment(1);
                            }
                            Err(e) => {
                                tracing::warn!(subscription_id = subscription.id, error = %e, "failed to delete push subscription");
                            }
                        }
                    }
                    Err(e) => {
                        summary.pushes_failed += 1;
                        counter!("notifications_push_total", "outcome" => "failed").increment(1);
                        tracing::warn!(subscription_id = subscription.id, error = %e, "push delivery failed");
                    }
                }
            }
        }
    }

    /// Entry point for the verification-email job. Sent even when alert
    /// notifications are switched off, since it is not an alert.
    pub async fn send_verification_email(&self, email: &str, token: &str) -> Result<ChainOutcome, PipelineError> {
        let settings = self.settings.get().map_err(PipelineError::Settings)?;
        let message = self.renderer.verification_email(email, token);
        let outcome = self.providers.chain(&settings).send_one(&message).await.map_err(|e| {
            tracing::error!(error = %e, "verification email failed");
            PipelineError::from(e)
        })?;
        tracing::info!(outcome = ?outcome, "verification email processed");
        Ok(outcome)
    }
}
