use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod events;
mod sweep;

use config::AppConfig;
use nearwatch_core::alerts::AlertLifecycleManager;
use nearwatch_core::crypto::EnvelopeCipher;
use nearwatch_core::gate::SubmissionGate;
use nearwatch_core::notify::{
    HttpProviderFactory, MessageRenderer, NominatimGeocoder, NotificationPipeline, PipelineParts,
    RelayPushSender,
};
use nearwatch_core::retention::RetentionSweeper;
use nearwatch_core::settings::SettingsCache;
use nearwatch_core::store::PgStore;
use nearwatch_shared::clients::db::create_pool;
use nearwatch_shared::clients::rabbitmq::RabbitMQClient;

pub struct WorkerState {
    pub rabbitmq: RabbitMQClient,
    pub pipeline: NotificationPipeline,
    pub prefetch: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nearwatch_shared::middleware::init_tracing("nearwatch-worker");

    let config = AppConfig::load()?;

    let cipher = Arc::new(
        EnvelopeCipher::from_key_list(&config.email_keys)
            .context("NEARWATCH_WORKER__EMAIL_KEYS must hold at least one kid:base64key entry")?,
    );

    let pool = create_pool(&config.database_url, config.db_pool_size)?;
    let store = Arc::new(PgStore::new(pool));
    let settings = Arc::new(SettingsCache::new(store.clone()));
    let gate = Arc::new(SubmissionGate::new(store.clone(), settings.clone()));
    let alerts = Arc::new(AlertLifecycleManager::new(
        store.clone(),
        gate,
        settings.clone(),
        cipher,
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .user_agent(concat!("nearwatch-worker/", env!("CARGO_PKG_VERSION")))
        .build()?;

    if config.push_relay_url.trim().is_empty() {
        tracing::warn!("no push relay configured, push deliveries will fail");
    }

    let pipeline = NotificationPipeline::new(PipelineParts {
        store: store.clone(),
        settings: settings.clone(),
        alerts,
        providers: Arc::new(HttpProviderFactory::new(http.clone(), config.providers.clone())),
        push: Arc::new(RelayPushSender::new(http.clone(), config.push_relay_url.clone())),
        geocoder: Arc::new(NominatimGeocoder::new(http, config.geocoder_url.clone())),
        renderer: MessageRenderer::new(&config.render),
    });

    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url, "nearwatch-worker").await?;
    let state = Arc::new(WorkerState {
        rabbitmq,
        pipeline,
        prefetch: config.prefetch,
    });

    // Spawn report notification consumer
    let report_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_report_jobs(report_state).await {
            tracing::error!(error = %e, "report job consumer failed");
        }
    });

    // Spawn verification email consumer
    let verification_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_verification_jobs(verification_state).await {
            tracing::error!(error = %e, "verification job consumer failed");
        }
    });

    let sweeper = Arc::new(RetentionSweeper::new(store, settings));
    tokio::spawn(sweep::run_retention(
        sweeper,
        Duration::from_secs(config.sweep_interval_secs.max(60)),
    ));

    tracing::info!("nearwatch-worker running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("nearwatch-worker shutting down");

    Ok(())
}
