use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A rendered message ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// From-address used by every provider.
#[derive(Debug, Clone)]
pub struct Sender {
    pub email: String,
    pub name: String,
}

impl Sender {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    fn formatted(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Credentials are missing. The fallback chain skips such providers quietly.
    #[error("provider is not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// One transactional email backend. A batch goes out in as few calls as the
/// provider's per-request limit allows; a single message is a batch of one.
/// If a later request fails, recipients of the earlier ones have already been
/// sent the message.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, batch: &[OutboundEmail]) -> Result<(), ProviderError>;
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        body,
    })
}

// --- Resend ---

/// `/emails/batch` accepts at most this many messages per call.
pub const RESEND_MAX_BATCH: usize = 100;

#[derive(Debug, Serialize)]
struct ResendMessage<'a> {
    from: String,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

pub struct ResendProvider {
    client: Client,
    api_key: String,
    sender: Sender,
    base_url: String,
}

impl ResendProvider {
    pub fn new(client: Client, api_key: &str, sender: Sender) -> Self {
        Self {
            client,
            api_key: api_key.trim().to_string(),
            sender,
            base_url: "https://api.resend.com".into(),
        }
    }

    fn bodies<'a>(&self, batch: &'a [OutboundEmail]) -> Vec<Vec<ResendMessage<'a>>> {
        batch
            .chunks(RESEND_MAX_BATCH)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|m| ResendMessage {
                        from: self.sender.formatted(),
                        to: [m.to.as_str()],
                        subject: &m.subject,
                        html: &m.html,
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, batch: &[OutboundEmail]) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        for body in self.bodies(batch) {
            let response = self.client
                .post(format!("{}/emails/batch", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await?;
            check_status(response).await?;
        }

        tracing::debug!(count = batch.len(), "email batch sent via resend");
        Ok(())
    }
}

// --- Postmark ---

/// `/email/batch` accepts at most this many messages per call.
pub const POSTMARK_MAX_BATCH: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkMessage<'a> {
    from: String,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    message_stream: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkResult {
    error_code: i64,
    #[serde(default)]
    message: String,
}

pub struct PostmarkProvider {
    client: Client,
    server_token: String,
    sender: Sender,
    base_url: String,
}

impl PostmarkProvider {
    pub fn new(client: Client, server_token: &str, sender: Sender) -> Self {
        Self {
            client,
            server_token: server_token.trim().to_string(),
            sender,
            base_url: "https://api.postmarkapp.com".into(),
        }
    }

    fn bodies<'a>(&self, batch: &'a [OutboundEmail]) -> Vec<Vec<PostmarkMessage<'a>>> {
        batch
            .chunks(POSTMARK_MAX_BATCH)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|m| PostmarkMessage {
                        from: self.sender.formatted(),
                        to: &m.to,
                        subject: &m.subject,
                        html_body: &m.html,
                        message_stream: "outbound",
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl EmailProvider for PostmarkProvider {
    fn name(&self) -> &'static str {
        "postmark"
    }

    async fn send(&self, batch: &[OutboundEmail]) -> Result<(), ProviderError> {
        if self.server_token.is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        for body in self.bodies(batch) {
            let response = self.client
                .post(format!("{}/email/batch", self.base_url))
                .header("X-Postmark-Server-Token", &self.server_token)
                .header("Accept", "application/json")
                .json(&body)
                .send()
                .await?;
            let response = check_status(response).await?;

            // The batch endpoint answers 200 even when individual messages fail.
            let results: Vec<PostmarkResult> = response.json().await?;
            if let Some(failed) = results.iter().find(|r| r.error_code != 0) {
                return Err(ProviderError::Rejected {
                    status: 200,
                    body: format!("postmark error {}: {}", failed.error_code, failed.message),
                });
            }
        }

        tracing::debug!(count = batch.len(), "email batch sent via postmark");
        Ok(())
    }
}

// --- Brevo ---

/// `messageVersions` holds at most this many entries per call.
pub const BREVO_MAX_BATCH: usize = 1000;

#[derive(Debug, Serialize)]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoVersion<'a> {
    to: [BrevoAddress<'a>; 1],
    subject: &'a str,
    html_content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoRequest<'a> {
    sender: BrevoAddress<'a>,
    subject: &'a str,
    html_content: &'a str,
    message_versions: Vec<BrevoVersion<'a>>,
}

pub struct BrevoProvider {
    client: Client,
    api_key: String,
    sender: Sender,
    base_url: String,
}

impl BrevoProvider {
    pub fn new(client: Client, api_key: &str, sender: Sender) -> Self {
        Self {
            client,
            api_key: api_key.trim().to_string(),
            sender,
            base_url: "https://api.brevo.com".into(),
        }
    }

    fn bodies<'a>(&'a self, batch: &'a [OutboundEmail]) -> Vec<BrevoRequest<'a>> {
        batch
            .chunks(BREVO_MAX_BATCH)
            .map(|chunk| BrevoRequest {
                sender: BrevoAddress {
                    email: &self.sender.email,
                    name: Some(&self.sender.name),
                },
                // Chunks are never empty; the top-level fields are only a default.
                subject: &chunk[0].subject,
                html_content: &chunk[0].html,
                message_versions: chunk
                    .iter()
                    .map(|m| BrevoVersion {
                        to: [BrevoAddress { email: &m.to, name: None }],
                        subject: &m.subject,
                        html_content: &m.html,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl EmailProvider for BrevoProvider {
    fn name(&self) -> &'static str {
        "brevo"
    }

    async fn send(&self, batch: &[OutboundEmail]) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured);
        }
        for body in self.bodies(batch) {
            let response = self.client
                .post(format!("{}/v3/smtp/email", self.base_url))
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await?;
            check_status(response).await?;
        }

        tracing::debug!(count = batch.len(), "email batch sent via brevo");
        Ok(())
    }
}
