//! Shared harness: the full core wired over `MemoryStore`, with scripted
//! email providers, a recording push sender, and a fixed geocoder.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;

use nearwatch_core::alerts::{AlertLifecycleManager, NewAlertRequest};
use nearwatch_core::crypto::EnvelopeCipher;
use nearwatch_core::gate::{Caller, SubmissionGate};
use nearwatch_core::geo::Coordinates;
use nearwatch_core::models::{Alert, NewWebPushSubscription, Report, SystemSettings, WebPushSubscription};
use nearwatch_core::notify::{
    FallbackChain, Geocoder, MessageRenderer, NotificationPipeline, PipelineParts, ProviderFactory,
    PushError, PushPayload, PushSender, RenderConfig,
};
use nearwatch_core::privacy::email_hash;
use nearwatch_core::settings::SettingsCache;
use nearwatch_core::store::{MemoryStore, PushSubscriptionStore, VerificationStore};
use nearwatch_core::submissions::{NewReportRequest, ReportService};
use nearwatch_shared::clients::email::{EmailProvider, OutboundEmail, ProviderError};
use nearwatch_shared::types::job::Job;

pub struct ScriptedProvider {
    name: &'static str,
    result: Result<(), ProviderError>,
    batches: Mutex<Vec<Vec<OutboundEmail>>>,
}

impl ScriptedProvider {
    pub fn new(name: &'static str, result: Result<(), ProviderError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            result,
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn batches(&self) -> Vec<Vec<OutboundEmail>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl EmailProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, batch: &[OutboundEmail]) -> Result<(), ProviderError> {
        self.batches.lock().push(batch.to_vec());
        self.result.clone()
    }
}

pub struct ScriptedProviders(pub Vec<Arc<ScriptedProvider>>);

impl ProviderFactory for ScriptedProviders {
    fn chain(&self, _settings: &SystemSettings) -> FallbackChain {
        FallbackChain::new(
            self.0
                .iter()
                .map(|p| p.clone() as Arc<dyn EmailProvider>)
                .collect(),
        )
    }
}

/// Records deliveries. Endpoints listed in `gone` answer 410, endpoints in
/// `failing` answer with a transient error.
#[derive(Default)]
pub struct RecordingPush {
    pub gone: Vec<String>,
    pub failing: Vec<String>,
    pub deliveries: Mutex<Vec<(WebPushSubscription, PushPayload)>>,
}

impl RecordingPush {
    pub fn deliveries(&self) -> Vec<(WebPushSubscription, PushPayload)> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, subscription: &WebPushSubscription, payload: &PushPayload) -> Result<(), PushError> {
        if self.gone.contains(&subscription.endpoint) {
            return Err(PushError::Gone { status: 410 });
        }
        if self.failing.contains(&subscription.endpoint) {
            return Err(PushError::Failed("relay timed out".into()));
        }
        self.deliveries.lock().push((subscription.clone(), payload.clone()));
        Ok(())
    }
}

pub struct FixedGeocoder(pub Option<String>);

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn reverse(&self, _point: Coordinates) -> Option<String> {
        self.0.clone()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub alerts: Arc<AlertLifecycleManager>,
    pub reports: ReportService,
    pub pipeline: NotificationPipeline,
    pub push: Arc<RecordingPush>,
    pub providers: Vec<Arc<ScriptedProvider>>,
}

pub fn key_list() -> String {
    format!("k1:{}", STANDARD.encode([9u8; 32]))
}

impl Harness {
    pub fn new() -> Self {
        Self::with(vec![ScriptedProvider::new("primary", Ok(()))], RecordingPush::default())
    }

    pub fn with(providers: Vec<Arc<ScriptedProvider>>, push: RecordingPush) -> Self {
        let store = Arc::new(MemoryStore::new());
        let settings = Arc::new(SettingsCache::new(store.clone()));
        let gate = Arc::new(SubmissionGate::new(store.clone(), settings.clone()));
        let cipher = Arc::new(EnvelopeCipher::from_key_list(&key_list()).expect("test key list"));
        let alerts = Arc::new(AlertLifecycleManager::new(
            store.clone(),
            gate.clone(),
            settings.clone(),
            cipher,
        ));
        let push = Arc::new(push);

        let pipeline = NotificationPipeline::new(PipelineParts {
            store: store.clone(),
            settings,
            alerts: alerts.clone(),
            providers: Arc::new(ScriptedProviders(providers.clone())),
            push: push.clone(),
            geocoder: Arc::new(FixedGeocoder(Some("5th Ave, New York".into()))),
            renderer: MessageRenderer::new(&RenderConfig {
                public_base_url: "https://nearwatch.test".into(),
                map_base_url: "https://maps.nearwatch.test".into(),
                display_offset_minutes: 0,
            }),
        });

        Self {
            reports: ReportService::new(store.clone(), gate),
            store,
            alerts,
            pipeline,
            push,
            providers,
        }
    }

    pub fn push_alert(&self, owner: &str, center: Coordinates, radius_km: f64) -> Alert {
        self.alerts
            .create(
                NewAlertRequest {
                    owner_identifier: owner.into(),
                    location: center,
                    radius_km,
                    message: "Around the block".into(),
                    email: None,
                    use_email: false,
                    use_push: true,
                },
                Caller::Public,
            )
            .expect("push alert")
            .record
    }

    /// Create an email alert and confirm its address.
    pub fn verified_email_alert(&self, owner: &str, email: &str, center: Coordinates, radius_km: f64) -> Alert {
        let created = self
            .alerts
            .create(
                NewAlertRequest {
                    owner_identifier: owner.into(),
                    location: center,
                    radius_km,
                    message: "Near school".into(),
                    email: Some(email.into()),
                    use_email: true,
                    use_push: false,
                },
                Caller::Public,
            )
            .expect("email alert");
        self.alerts
            .verify_email(&self.token_for(email))
            .expect("verify email");
        created.record
    }

    pub fn token_for(&self, email: &str) -> String {
        self.store
            .find_verification_by_hash(&email_hash(email))
            .expect("lookup")
            .expect("verification row")
            .token
    }

    pub fn subscribe(&self, owner: &str, endpoint: &str) -> WebPushSubscription {
        self.store
            .insert_subscription(NewWebPushSubscription {
                owner_identifier: owner.into(),
                endpoint: endpoint.into(),
                p256dh: "p256dh-key".into(),
                auth: "auth-secret".into(),
                created_at: Utc::now(),
            })
            .expect("subscription")
    }

    /// Submit a report as `reporter`, standing at the reported spot. Returns
    /// the report and the id carried by its notify job.
    pub fn report(&self, reporter: &str, at: Coordinates, emergency: bool) -> Report {
        let committed = self
            .reports
            .submit(
                NewReportRequest {
                    reporter_identifier: reporter.into(),
                    location: at,
                    reporter_location: Some(at),
                    message: Some("Smoke coming from a building".into()),
                    is_emergency: emergency,
                },
                Caller::Public,
            )
            .expect("report");
        assert_eq!(committed.jobs, vec![Job::notify_report(committed.record.external_id)]);
        committed.record
    }
}
