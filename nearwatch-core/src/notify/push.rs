use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::models::WebPushSubscription;

/// Seconds the push service should hold an undelivered message.
const PUSH_TTL_SECS: u32 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The browser dropped the subscription; it should be deleted.
    #[error("push endpoint is gone (status {status})")]
    Gone { status: u16 },

    #[error("push delivery failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &WebPushSubscription, payload: &PushPayload) -> Result<(), PushError>;
}

#[derive(Serialize)]
struct RelayKeys<'a> {
    p256dh: &'a str,
    auth: &'a str,
}

#[derive(Serialize)]
struct RelaySubscription<'a> {
    endpoint: &'a str,
    keys: RelayKeys<'a>,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: RelaySubscription<'a>,
    payload: &'a PushPayload,
    ttl: u32,
}

/// Hands each message to a web-push relay that holds the VAPID keys and
/// performs the payload encryption. The relay answers with the push
/// service's status, so 404 and 410 mean the subscription is gone.
pub struct RelayPushSender {
    client: Client,
    relay_url: String,
}

impl RelayPushSender {
    pub fn new(client: Client, relay_url: impl Into<String>) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
        }
    }

    fn request<'a>(subscription: &'a WebPushSubscription, payload: &'a PushPayload) -> RelayRequest<'a> {
        RelayRequest {
            subscription: RelaySubscription {
                endpoint: &subscription.endpoint,
                keys: RelayKeys {
                    p256dh: &subscription.p256dh,
                    auth: &subscription.auth,
                },
            },
            payload,
            ttl: PUSH_TTL_SECS,
        }
    }
}

#[async_trait]
impl PushSender for RelayPushSender {
    async fn send(&self, subscription: &WebPushSubscription, payload: &PushPayload) -> Result<(), PushError> {
        if self.relay_url.trim().is_empty() {
            return Err(PushError::Failed("push relay is not configured".into()));
        }

        let response = self
            .client
            .post(&self.relay_url)
            .json(&Self::request(subscription, payload))
            .send()
            .await
            .map_err(|e| PushError::Failed(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status @ (StatusCode::NOT_FOUND | StatusCode::GONE) => Err(PushError::Gone {
                status: status.as_u16(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PushError::Failed(format!("relay answered {status}: {body}")))
            }
        }
    }
}
