mod common;

use common::Harness;
use nearwatch_core::alerts::NewAlertRequest;
use nearwatch_core::gate::Caller;
use nearwatch_core::geo::Coordinates;
use nearwatch_core::privacy::email_hash;
use nearwatch_core::store::{VerificationStore, Visibility};
use nearwatch_shared::clients::queue::{dispatch_all, RecordingQueue};
use nearwatch_shared::errors::{ErrorCode, Rejection};
use nearwatch_shared::types::job::Job;

const CENTER: Coordinates = Coordinates {
    latitude: 51.5,
    longitude: -0.12,
};

fn email_alert(owner: &str, email: &str) -> NewAlertRequest {
    NewAlertRequest {
        owner_identifier: owner.into(),
        location: CENTER,
        radius_km: 3.0,
        message: "Near the station".into(),
        email: Some(email.into()),
        use_email: true,
        use_push: false,
    }
}

#[tokio::test]
async fn verification_job_reaches_the_mailbox() {
    let harness = Harness::new();
    let queue = RecordingQueue::new();

    let created = harness
        .alerts
        .create(email_alert("owner-device-1", "walker@example.com"), Caller::Public)
        .unwrap();
    assert!(!created.record.verified);
    assert_eq!(dispatch_all(&queue, created.jobs).await, 1);

    for job in queue.drain() {
        match job {
            Job::SendVerificationEmail(payload) => {
                harness
                    .pipeline
                    .send_verification_email(&payload.email, &payload.token)
                    .await
                    .unwrap();
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    let sent = harness.providers[0].batches();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0].to, "walker@example.com");
    let token = harness.token_for("walker@example.com");
    assert!(sent[0][0].html.contains(&token));
}

#[tokio::test]
async fn confirming_once_verifies_every_alert_with_the_address() {
    let harness = Harness::new();
    let first = harness
        .alerts
        .create(email_alert("owner-device-1", "Walker@Example.com"), Caller::Public)
        .unwrap();
    let second = harness
        .alerts
        .create(email_alert("owner-device-2", " walker@example.com "), Caller::Public)
        .unwrap();

    // Same normalized address, same pending token.
    let token = harness.token_for("walker@example.com");
    for jobs in [&first.jobs, &second.jobs] {
        match jobs.as_slice() {
            [Job::SendVerificationEmail(payload)] => assert_eq!(payload.token, token),
            other => panic!("unexpected jobs {other:?}"),
        }
    }

    let outcome = harness.alerts.verify_email(&token).unwrap();
    assert_eq!(outcome.alerts_verified, 2);
    assert!(!outcome.already_verified);

    for owner in ["owner-device-1", "owner-device-2"] {
        let alerts = harness.alerts.list_for_owner(owner, Visibility::Live).unwrap();
        assert!(alerts.iter().all(|a| a.verified));
    }

    // Later alerts for a confirmed address need no second round trip.
    let third = harness
        .alerts
        .create(email_alert("owner-device-3", "walker@example.com"), Caller::Public)
        .unwrap();
    assert!(third.record.verified);
    assert!(third.jobs.is_empty());
}

#[tokio::test]
async fn reusing_a_token_is_harmless() {
    let harness = Harness::new();
    harness
        .alerts
        .create(email_alert("owner-device-1", "twice@example.com"), Caller::Public)
        .unwrap();
    let token = harness.token_for("twice@example.com");

    let confirmed_at = |harness: &Harness| {
        harness
            .store
            .find_verification_by_hash(&email_hash("twice@example.com"))
            .unwrap()
            .unwrap()
            .verified_at
    };

    let first = harness.alerts.verify_email(&token).unwrap();
    let stamped = confirmed_at(&harness);
    assert!(stamped.is_some());

    let second = harness.alerts.verify_email(&token).unwrap();
    assert!(!first.already_verified);
    assert!(second.already_verified);
    assert_eq!(second.alerts_verified, 0);
    assert_eq!(first.email_hash, second.email_hash);
    assert_eq!(confirmed_at(&harness), stamped);
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let harness = Harness::new();
    for token in ["", "   ", "deadbeef"] {
        let err = harness.alerts.verify_email(token).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::VerificationTokenInvalid);
    }
}

#[tokio::test]
async fn alert_quota_applies_per_owner() {
    let harness = Harness::new();
    for _ in 0..3 {
        harness.push_alert("owner-device-1", CENTER, 2.0);
    }

    let err = harness
        .alerts
        .create(email_alert("owner-device-1", "late@example.com"), Caller::Public)
        .unwrap_err();
    assert_eq!(err.rejection(), Some(Rejection::AlertQuotaExceeded));
    assert!(err.to_string().contains("3 alerts every 10 minutes"));

    // Other owners and admins are unaffected.
    harness.push_alert("owner-device-2", CENTER, 2.0);
    harness
        .alerts
        .create(email_alert("owner-device-1", "admin@example.com"), Caller::Admin)
        .unwrap();
}

#[tokio::test]
async fn deleted_alerts_stay_visible_only_on_request() {
    let harness = Harness::new();
    let alert = harness.push_alert("owner-device-1", CENTER, 2.0);
    harness
        .alerts
        .soft_delete(alert.external_id, "owner-device-1", Caller::Public)
        .unwrap();

    assert!(harness
        .alerts
        .list_for_owner("owner-device-1", Visibility::Live)
        .unwrap()
        .is_empty());
    let all = harness
        .alerts
        .list_for_owner("owner-device-1", Visibility::IncludeDeleted)
        .unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted_at.is_some());
}
