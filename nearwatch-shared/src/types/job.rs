use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RabbitMQ envelope wrapping every background job.
///
/// Routing key format: `nearwatch.jobs.{entity}.{action}`
/// Example: `nearwatch.jobs.report.notify`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// RabbitMQ routing keys
pub mod routing_keys {
    pub const REPORT_NOTIFY: &str = "nearwatch.jobs.report.notify";
    pub const ALERT_VERIFICATION_EMAIL: &str = "nearwatch.jobs.alert.verification_email";
}

/// Job payloads
pub mod payloads {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Run the notification pipeline for a freshly created report.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct NotifyReport {
        pub report_id: Uuid,
    }

    /// Send the confirmation link for an alert email. Carries the plaintext
    /// address because the alert row only stores it encrypted.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SendVerificationEmail {
        pub email: String,
        pub token: String,
    }
}

/// A unit of background work, handed to the job queue by the composition root.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    NotifyReport(payloads::NotifyReport),
    SendVerificationEmail(payloads::SendVerificationEmail),
}

impl Job {
    pub fn notify_report(report_id: Uuid) -> Self {
        Self::NotifyReport(payloads::NotifyReport { report_id })
    }

    pub fn send_verification_email(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self::SendVerificationEmail(payloads::SendVerificationEmail {
            email: email.into(),
            token: token.into(),
        })
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Job::NotifyReport(_) => routing_keys::REPORT_NOTIFY,
            Job::SendVerificationEmail(_) => routing_keys::ALERT_VERIFICATION_EMAIL,
        }
    }

    /// Serialize into the envelope published on the wire.
    pub fn to_envelope(&self, source: &str) -> serde_json::Result<Vec<u8>> {
        match self {
            Job::NotifyReport(data) => {
                serde_json::to_vec(&Event::new(source, self.routing_key(), data))
            }
            Job::SendVerificationEmail(data) => {
                serde_json::to_vec(&Event::new(source, self.routing_key(), data))
            }
        }
    }

    /// Parse a delivery back into a job, using the routing key to pick the payload.
    pub fn from_envelope(routing_key: &str, body: &[u8]) -> Result<Self, JobDecodeError> {
        match routing_key {
            routing_keys::REPORT_NOTIFY => {
                let event: Event<payloads::NotifyReport> = serde_json::from_slice(body)?;
                Ok(Job::NotifyReport(event.data))
            }
            routing_keys::ALERT_VERIFICATION_EMAIL => {
                let event: Event<payloads::SendVerificationEmail> = serde_json::from_slice(body)?;
                Ok(Job::SendVerificationEmail(event.data))
            }
            other => Err(JobDecodeError::UnknownRoutingKey(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobDecodeError {
    #[error("unknown routing key: {0}")]
    UnknownRoutingKey(String),

    #[error("malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),
}
