mod common;

use chrono::Utc;
use uuid::Uuid;

use common::{Harness, RecordingPush, ScriptedProvider};
use nearwatch_core::geo::Coordinates;
use nearwatch_core::models::NewAlert;
use nearwatch_core::notify::PipelineError;
use nearwatch_core::privacy::email_hash;
use nearwatch_core::store::{AlertStore, PushSubscriptionStore};
use nearwatch_shared::clients::email::ProviderError;

const CENTER: Coordinates = Coordinates {
    latitude: 40.0,
    longitude: -74.0,
};
const NEARBY: Coordinates = Coordinates {
    latitude: 40.01,
    longitude: -74.0,
};

#[tokio::test]
async fn emergency_report_pushes_to_alert_owner() {
    let harness = Harness::new();
    let alert = harness.push_alert("owner-device-1", CENTER, 10.0);
    assert!(alert.verified);
    harness.subscribe("owner-device-1", "https://push.example/owner-1");
    harness.subscribe("someone-else-1", "https://push.example/other");

    let report = harness.report("reporter-device-1", NEARBY, true);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();

    let deliveries = harness.push.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (subscription, payload) = &deliveries[0];
    assert_eq!(subscription.owner_identifier, "owner-device-1");
    assert!(payload.title.contains("EMERGENCY"));
    assert!(payload.url.ends_with(&report.external_id.to_string()));

    assert_eq!(summary.matched_alerts, 1);
    assert_eq!(summary.pushes_sent, 1);
    assert_eq!(summary.emails_sent, 0);
}

#[tokio::test]
async fn report_outside_radius_notifies_nobody() {
    let harness = Harness::new();
    harness.push_alert("owner-device-1", CENTER, 1.0);
    harness.subscribe("owner-device-1", "https://push.example/owner-1");

    // ~5.5 km north.
    let far = Coordinates::new(40.05, -74.0);
    let report = harness.report("reporter-device-1", far, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();

    assert_eq!(summary.matched_alerts, 0);
    assert!(harness.push.deliveries().is_empty());
}

#[tokio::test]
async fn matched_emails_go_out_in_one_batch() {
    let harness = Harness::new();
    harness.verified_email_alert("owner-device-1", "one@example.com", CENTER, 10.0);
    harness.verified_email_alert("owner-device-2", "two@example.com", CENTER, 10.0);

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();

    let batches = harness.providers[0].batches();
    assert_eq!(batches.len(), 1);
    let mut recipients: Vec<_> = batches[0].iter().map(|m| m.to.as_str()).collect();
    recipients.sort();
    assert_eq!(recipients, vec!["one@example.com", "two@example.com"]);
    assert!(batches[0][0].html.contains("5th Ave, New York"));
    assert_eq!(batches[0][0].subject, "New report near your alert");

    assert_eq!(summary.emails_sent, 2);
    assert_eq!(summary.email_provider, Some("primary"));
}

#[tokio::test]
async fn unverified_email_alert_is_never_notified() {
    let harness = Harness::new();
    harness
        .alerts
        .create(
            nearwatch_core::alerts::NewAlertRequest {
                owner_identifier: "owner-device-1".into(),
                location: CENTER,
                radius_km: 10.0,
                message: "Unconfirmed".into(),
                email: Some("pending@example.com".into()),
                use_email: true,
                use_push: false,
            },
            nearwatch_core::gate::Caller::Public,
        )
        .unwrap();

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();
    assert_eq!(summary.matched_alerts, 0);
    assert!(harness.providers[0].batches().is_empty());
}

#[tokio::test]
async fn undecryptable_email_is_skipped() {
    let harness = Harness::new();
    harness
        .store
        .insert_alert(NewAlert {
            external_id: Uuid::new_v4(),
            latitude: CENTER.latitude,
            longitude: CENTER.longitude,
            radius_km: 10.0,
            message: "Rotated key".into(),
            owner_identifier: "owner-device-1".into(),
            encrypted_email: Some("retired-key.AAAA.BBBB".into()),
            email_hash: Some(email_hash("lost@example.com")),
            verified: true,
            use_email: true,
            use_push: false,
            created_at: Utc::now(),
        })
        .unwrap();
    harness.verified_email_alert("owner-device-2", "ok@example.com", CENTER, 10.0);

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();

    assert_eq!(summary.matched_alerts, 2);
    assert_eq!(summary.emails_skipped, 1);
    assert_eq!(summary.emails_sent, 1);
    assert_eq!(harness.providers[0].batches()[0][0].to, "ok@example.com");
}

#[tokio::test]
async fn gone_subscription_is_pruned_and_others_still_delivered() {
    let push = RecordingPush {
        gone: vec!["https://push.example/gone".into()],
        failing: vec!["https://push.example/flaky".into()],
        ..RecordingPush::default()
    };
    let harness = Harness::with(vec![ScriptedProvider::new("primary", Ok(()))], push);
    harness.push_alert("owner-device-1", CENTER, 10.0);
    harness.subscribe("owner-device-1", "https://push.example/gone");
    harness.subscribe("owner-device-1", "https://push.example/flaky");
    harness.subscribe("owner-device-1", "https://push.example/ok");

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();

    assert_eq!(summary.pushes_sent, 1);
    assert_eq!(summary.pushes_failed, 1);
    assert_eq!(summary.subscriptions_pruned, 1);

    let remaining: Vec<_> = harness
        .store
        .subscriptions_for_owner("owner-device-1")
        .unwrap()
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    assert_eq!(remaining, vec!["https://push.example/flaky", "https://push.example/ok"]);
}

#[tokio::test]
async fn owner_with_two_alerts_gets_one_push_per_subscription() {
    let harness = Harness::new();
    harness.push_alert("owner-device-1", CENTER, 10.0);
    harness.push_alert("owner-device-1", CENTER, 20.0);
    harness.subscribe("owner-device-1", "https://push.example/owner-1");

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();
    assert_eq!(summary.matched_alerts, 2);
    assert_eq!(harness.push.deliveries().len(), 1);
}

#[tokio::test]
async fn exhausted_chain_fails_the_job_when_nothing_was_delivered() {
    let providers = vec![
        ScriptedProvider::new("one", Err(ProviderError::Transport("timeout".into()))),
        ScriptedProvider::new("two", Err(ProviderError::Rejected { status: 503, body: "busy".into() })),
        ScriptedProvider::new("three", Err(ProviderError::Transport("reset".into()))),
    ];
    let harness = Harness::with(providers, RecordingPush::default());
    harness.verified_email_alert("owner-device-1", "one@example.com", CENTER, 10.0);

    let report = harness.report("reporter-device-1", NEARBY, false);
    let err = harness.pipeline.run(report.external_id).await.unwrap_err();
    match err {
        PipelineError::EmailDelivery(chain) => assert_eq!(chain.failures.len(), 3),
        other => panic!("unexpected error: {other}"),
    }
    for provider in &harness.providers {
        assert_eq!(provider.batches().len(), 1);
    }
}

#[tokio::test]
async fn exhausted_chain_after_push_success_is_not_fatal() {
    let providers = vec![ScriptedProvider::new("only", Err(ProviderError::Transport("down".into())))];
    let harness = Harness::with(providers, RecordingPush::default());
    harness.verified_email_alert("owner-device-1", "one@example.com", CENTER, 10.0);
    harness.push_alert("owner-device-2", CENTER, 10.0);
    harness.subscribe("owner-device-2", "https://push.example/owner-2");

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();
    assert!(summary.email_failed);
    assert_eq!(summary.pushes_sent, 1);
}

#[tokio::test]
async fn unconfigured_providers_are_not_a_failure() {
    let providers = vec![
        ScriptedProvider::new("one", Err(ProviderError::NotConfigured)),
        ScriptedProvider::new("two", Err(ProviderError::NotConfigured)),
    ];
    let harness = Harness::with(providers, RecordingPush::default());
    harness.verified_email_alert("owner-device-1", "one@example.com", CENTER, 10.0);

    let report = harness.report("reporter-device-1", NEARBY, false);
    let summary = harness.pipeline.run(report.external_id).await.unwrap();
    assert_eq!(summary.emails_sent, 0);
    assert!(!summary.email_failed);
}

#[tokio::test]
async fn missing_report_is_an_error() {
    let harness = Harness::new();
    let id = Uuid::new_v4();
    let err = harness.pipeline.run(id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ReportNotFound(missing) if missing == id));
}

#[tokio::test]
async fn deleted_report_is_not_delivered() {
    let harness = Harness::new();
    harness.push_alert("owner-device-1", CENTER, 10.0);
    harness.subscribe("owner-device-1", "https://push.example/owner-1");
    let report = harness.report("reporter-device-1", NEARBY, false);
    harness.reports.soft_delete(report.external_id).unwrap();

    let err = harness.pipeline.run(report.external_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ReportNotFound(_)));
    assert!(harness.push.deliveries().is_empty());
}

#[tokio::test]
async fn verification_email_goes_through_the_chain() {
    let harness = Harness::new();
    let outcome = harness
        .pipeline
        .send_verification_email("new@example.com", "tok123")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        nearwatch_core::notify::ChainOutcome::Delivered { provider: "primary" }
    );
    let sent = &harness.providers[0].batches()[0][0];
    assert_eq!(sent.to, "new@example.com");
    assert!(sent.html.contains("/alerts/verify?token=tok123"));
}
