use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::{BasicAckOptions, BasicRejectOptions};

use nearwatch_core::notify::{NotificationPipeline, PipelineError};
use nearwatch_shared::types::job::{routing_keys, Job};

use crate::WorkerState;

/// Run one job to completion.
pub async fn execute(pipeline: &NotificationPipeline, job: Job) -> Result<(), PipelineError> {
    match job {
        Job::NotifyReport(data) => pipeline.run(data.report_id).await.map(|_| ()),
        Job::SendVerificationEmail(data) => pipeline
            .send_verification_email(&data.email, &data.token)
            .await
            .map(|_| ()),
    }
}

/// Listen for report notification jobs (report.notify).
pub async fn listen_report_jobs(state: Arc<WorkerState>) -> anyhow::Result<()> {
    consume(state, "nearwatch-worker.report.notify", routing_keys::REPORT_NOTIFY).await
}

/// Listen for verification email jobs (alert.verification_email).
pub async fn listen_verification_jobs(state: Arc<WorkerState>) -> anyhow::Result<()> {
    consume(
        state,
        "nearwatch-worker.alert.verification_email",
        routing_keys::ALERT_VERIFICATION_EMAIL,
    )
    .await
}

/// Jobs run at most once: a failed delivery is rejected without requeue.
async fn consume(state: Arc<WorkerState>, queue: &str, routing_key: &str) -> anyhow::Result<()> {
    let mut consumer = state
        .rabbitmq
        .subscribe(queue, &[routing_key], state.prefetch)
        .await?;

    tracing::info!(queue = %queue, "listening for jobs");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!(error = %e, queue = %queue, "job consumer error");
                continue;
            }
        };

        let key = delivery.routing_key.to_string();
        let succeeded = match Job::from_envelope(&key, &delivery.data) {
            Ok(job) => match execute(&state.pipeline, job).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, routing_key = %key, "job failed, dropping");
                    false
                }
            },
            Err(e) => {
                tracing::error!(error = %e, routing_key = %key, "failed to decode job");
                false
            }
        };

        let settled = if succeeded {
            delivery.ack(BasicAckOptions::default()).await
        } else {
            delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
        };
        if let Err(e) = settled {
            tracing::warn!(error = %e, routing_key = %key, "failed to settle delivery");
        }
    }

    Ok(())
}
