use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

use nearwatch_shared::clients::email::OutboundEmail;

use super::push::PushPayload;
use crate::models::{Alert, Report};

const PUSH_BODY_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base of links to the public site, e.g. `https://nearwatch.example`.
    pub public_base_url: String,
    /// Base of the map thumbnail proxy.
    pub map_base_url: String,
    /// Offset used when printing report times.
    pub display_offset_minutes: i32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".into(),
            map_base_url: "http://localhost:3000/map".into(),
            display_offset_minutes: 0,
        }
    }
}

pub struct MessageRenderer {
    public_base_url: String,
    map_base_url: String,
    offset: FixedOffset,
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

impl MessageRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        let offset = FixedOffset::east_opt(config.display_offset_minutes * 60).unwrap_or_else(|| {
            tracing::warn!(
                minutes = config.display_offset_minutes,
                "display offset out of range, using UTC"
            );
            Utc.fix()
        });
        Self {
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            map_base_url: config.map_base_url.trim_end_matches('/').to_string(),
            offset,
        }
    }

    pub fn report_url(&self, report: &Report) -> String {
        format!("{}/reports/{}", self.public_base_url, report.external_id)
    }

    pub fn thumbnail_url(&self, report: &Report) -> String {
        format!(
            "{}/thumbnail?lat={:.6}&lon={:.6}",
            self.map_base_url, report.latitude, report.longitude
        )
    }

    pub fn verify_url(&self, token: &str) -> String {
        format!("{}/alerts/verify?token={}", self.public_base_url, token)
    }

    pub fn alert_subject(report: &Report) -> &'static str {
        if report.is_emergency {
            "EMERGENCY report near your alert"
        } else {
            "New report near your alert"
        }
    }

    /// The email sent to one matched alert's owner.
    pub fn alert_email(&self, to: String, alert: &Alert, report: &Report, address: Option<&str>) -> OutboundEmail {
        let location = match address {
            Some(address) => escape_html(address),
            None => format!("{:.5}, {:.5}", report.latitude, report.longitude),
        };
        let reported_at = report
            .created_at
            .with_timezone(&self.offset)
            .format("%Y-%m-%d %H:%M (UTC%:z)");
        let emergency = if report.is_emergency {
            "<p><strong>This report was marked as an emergency.</strong></p>"
        } else {
            ""
        };
        let details = report
            .message
            .as_deref()
            .map(|m| format!("<p>Report: {}</p>", escape_html(m)))
            .unwrap_or_default();

        let html = format!(
            "<h2>{subject}</h2>\
             {emergency}\
             <p>Your alert \"{alert}\" matched a new report.</p>\
             {details}\
             <p>Location: {location}</p>\
             <p>Reported: {reported_at}</p>\
             <p><a href=\"{report_url}\"><img src=\"{thumbnail}\" alt=\"Map of the report location\"></a></p>\
             <p><a href=\"{report_url}\">View the report</a></p>",
            subject = Self::alert_subject(report),
            alert = escape_html(&alert.message),
            report_url = self.report_url(report),
            thumbnail = self.thumbnail_url(report),
        );

        OutboundEmail {
            to,
            subject: Self::alert_subject(report).to_string(),
            html,
        }
    }

    pub fn push_payload(&self, report: &Report) -> PushPayload {
        let title = if report.is_emergency {
            "EMERGENCY: New report nearby"
        } else {
            "New report nearby"
        };
        let body = report
            .message
            .as_deref()
            .map(|m| truncate_chars(m, PUSH_BODY_MAX_CHARS))
            .unwrap_or_else(|| "A new report was submitted near one of your alerts.".into());

        PushPayload {
            title: title.into(),
            body,
            url: self.report_url(report),
        }
    }

    pub fn verification_email(&self, to: &str, token: &str) -> OutboundEmail {
        let link = self.verify_url(token);
        OutboundEmail {
            to: to.to_string(),
            subject: "Confirm your email for Nearwatch alerts".into(),
            html: format!(
                "<p>Confirm this address to start receiving alert emails.</p>\
                 <p><a href=\"{link}\">Confirm email address</a></p>\
                 <p>If you did not create an alert, ignore this message.</p>"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn renderer(offset_minutes: i32) -> MessageRenderer {
        MessageRenderer::new(&RenderConfig {
            public_base_url: "https://nearwatch.test/".into(),
            map_base_url: "https://maps.nearwatch.test".into(),
            display_offset_minutes: offset_minutes,
        })
    }

    fn report(emergency: bool, message: Option<&str>) -> Report {
        Report {
            id: 1,
            external_id: Uuid::nil(),
            latitude: 40.01,
            longitude: -74.0,
            message: message.map(Into::into),
            reporter_latitude: None,
            reporter_longitude: None,
            is_emergency: emergency,
            reporter_identifier: "device-0001".into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap(),
            deleted_at: None,
        }
    }

    fn alert(message: &str) -> Alert {
        Alert {
            id: 2,
            external_id: Uuid::nil(),
            latitude: 40.0,
            longitude: -74.0,
            radius_km: 10.0,
            message: message.into(),
            owner_identifier: "device-0002".into(),
            encrypted_email: None,
            email_hash: None,
            verified: true,
            use_email: true,
            use_push: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn emergency_marks_subject_and_push_title() {
        let renderer = renderer(0);
        let r = report(true, None);
        assert_eq!(MessageRenderer::alert_subject(&r), "EMERGENCY report near your alert");
        assert!(renderer.push_payload(&r).title.contains("EMERGENCY"));
        assert!(!renderer.push_payload(&report(false, None)).title.contains("EMERGENCY"));
    }

    #[test]
    fn email_body_escapes_user_text_and_links_the_report() {
        let email = renderer(-300).alert_email(
            "a@example.com".into(),
            &alert("<b>home</b>"),
            &report(false, Some("smoke & sirens")),
            Some("5th Ave, New York"),
        );
        assert!(email.html.contains("&lt;b&gt;home&lt;/b&gt;"));
        assert!(email.html.contains("smoke &amp; sirens"));
        assert!(email.html.contains("5th Ave, New York"));
        assert!(email.html.contains("2026-03-01 13:30 (UTC-05:00)"));
        assert!(email.html.contains("https://nearwatch.test/reports/00000000-0000-0000-0000-000000000000"));
        assert!(email.html.contains("https://maps.nearwatch.test/thumbnail?lat=40.010000&lon=-74.000000"));
    }

    #[test]
    fn missing_address_falls_back_to_coordinates() {
        let email = renderer(0).alert_email("a@example.com".into(), &alert("home"), &report(false, None), None);
        assert!(email.html.contains("40.01000, -74.00000"));
    }

    #[test]
    fn push_body_is_truncated() {
        let long = "x".repeat(300);
        let payload = renderer(0).push_payload(&report(false, Some(&long)));
        assert_eq!(payload.body.chars().count(), PUSH_BODY_MAX_CHARS + 1);
    }

    #[test]
    fn verification_email_links_token() {
        let email = renderer(0).verification_email("a@example.com", "abc123");
        assert!(email.html.contains("https://nearwatch.test/alerts/verify?token=abc123"));
        assert_eq!(email.to, "a@example.com");
    }
}
