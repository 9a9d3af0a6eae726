use anyhow::Context;
use std::sync::Arc;

use nearwatch_api::config::AppConfig;
use nearwatch_api::{build_router, AppState};
use nearwatch_core::crypto::EnvelopeCipher;
use nearwatch_core::store::PgStore;
use nearwatch_shared::clients::db::create_pool;
use nearwatch_shared::clients::rabbitmq::RabbitMQClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nearwatch_shared::middleware::init_tracing("nearwatch-api");

    let config = AppConfig::load()?;
    let jwt_secret = nearwatch_shared::middleware::jwt_secret_from_env()?;
    nearwatch_shared::middleware::install_jwt_secret(jwt_secret);
    let port = config.port;

    let cipher = EnvelopeCipher::from_key_list(&config.email_keys)
        .context("NEARWATCH_API__EMAIL_KEYS must hold at least one kid:base64key entry")?;
    tracing::info!(key_id = cipher.primary_key_id(), "email encryption ready");

    let pool = create_pool(&config.database_url, config.db_pool_size)?;
    let store = Arc::new(PgStore::new(pool));

    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url, "nearwatch-api").await?;
    let metrics_handle = nearwatch_shared::middleware::init_metrics()?;

    let state = Arc::new(AppState::assemble(
        store,
        Arc::new(cipher),
        Arc::new(rabbitmq),
        Some(metrics_handle),
    ));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "nearwatch-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
