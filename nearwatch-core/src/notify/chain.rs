//! Ordered email provider fallback.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use reqwest::Client;
use serde::Deserialize;

use nearwatch_shared::clients::email::{
    BrevoProvider, EmailProvider, OutboundEmail, PostmarkProvider, ProviderError, ResendProvider,
    Sender,
};

use crate::models::SystemSettings;

#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: ProviderError,
}

/// Every configured provider failed. Holds one entry per attempted provider,
/// in the order they were tried.
#[derive(Debug, Clone, thiserror::Error)]
#[error("all email providers failed: {}", FailureList(.failures))]
pub struct ChainError {
    pub failures: Vec<ProviderFailure>,
}

struct FailureList<'a>(&'a [ProviderFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.provider, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Delivered { provider: &'static str },
    /// No provider had credentials. Logged as a warning, not a failure.
    Unconfigured,
    NothingToSend,
}

pub struct FallbackChain {
    providers: Vec<Arc<dyn EmailProvider>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn EmailProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try each provider in order until one accepts the whole batch.
    pub async fn send(&self, batch: &[OutboundEmail]) -> Result<ChainOutcome, ChainError> {
        if batch.is_empty() {
            return Ok(ChainOutcome::NothingToSend);
        }

        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.send(batch).await {
                Ok(()) => {
                    tracing::info!(provider = provider.name(), count = batch.len(), "email batch delivered");
                    counter!("notifications_email_batches_total", "outcome" => "delivered").increment(1);
                    return Ok(ChainOutcome::Delivered {
                        provider: provider.name(),
                    });
                }
                Err(ProviderError::NotConfigured) => {
                    tracing::debug!(provider = provider.name(), "email provider not configured, skipping");
                }
                Err(error) => {
                    tracing::warn!(provider = provider.name(), error = %error, "email provider failed, trying next");
                    failures.push(ProviderFailure {
                        provider: provider.name(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            tracing::warn!(count = batch.len(), "no email provider is configured, batch dropped");
            counter!("notifications_email_batches_total", "outcome" => "unconfigured").increment(1);
            return Ok(ChainOutcome::Unconfigured);
        }

        counter!("notifications_email_batches_total", "outcome" => "failed").increment(1);
        Err(ChainError { failures })
    }

    pub async fn send_one(&self, email: &OutboundEmail) -> Result<ChainOutcome, ChainError> {
        self.send(std::slice::from_ref(email)).await
    }
}

/// Builds the provider chain for the current settings, so credential changes
/// take effect on the next job.
pub trait ProviderFactory: Send + Sync {
    fn chain(&self, settings: &SystemSettings) -> FallbackChain;
}

/// Process-level provider credentials. Non-empty values in `SystemSettings`
/// take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default)]
    pub postmark_server_token: String,
    #[serde(default)]
    pub brevo_api_key: String,
}

pub struct HttpProviderFactory {
    client: Client,
    fallback: ProviderCredentials,
}

fn prefer<'a>(setting: &'a str, fallback: &'a str) -> &'a str {
    if setting.trim().is_empty() {
        fallback
    } else {
        setting
    }
}

impl HttpProviderFactory {
    pub fn new(client: Client, fallback: ProviderCredentials) -> Self {
        Self { client, fallback }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn chain(&self, settings: &SystemSettings) -> FallbackChain {
        let sender = Sender::new(&settings.email_from_address, &settings.email_from_name);
        FallbackChain::new(vec![
            Arc::new(ResendProvider::new(
                self.client.clone(),
                prefer(&settings.resend_api_key, &self.fallback.resend_api_key),
                sender.clone(),
            )),
            Arc::new(PostmarkProvider::new(
                self.client.clone(),
                prefer(&settings.postmark_server_token, &self.fallback.postmark_server_token),
                sender.clone(),
            )),
            Arc::new(BrevoProvider::new(
                self.client.clone(),
                prefer(&settings.brevo_api_key, &self.fallback.brevo_api_key),
                sender,
            )),
        ])
    }
}
