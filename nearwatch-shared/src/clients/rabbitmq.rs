use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer,
};

use crate::clients::queue::JobQueue;
use crate::errors::{AppError, AppResult};
use crate::types::job::Job;

const EXCHANGE_NAME: &str = "nearwatch.jobs";

#[derive(Clone)]
pub struct RabbitMQClient {
    channel: Channel,
    source: String,
}

impl RabbitMQClient {
    pub async fn connect(url: &str, source: &str) -> Result<Self, lapin::Error> {
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        // Declare the topic exchange
        channel
            .exchange_declare(
                EXCHANGE_NAME,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(source = %source, "connected to RabbitMQ");
        Ok(Self {
            channel,
            source: source.to_string(),
        })
    }

    /// Publish a serialized job under its routing key
    pub async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), lapin::Error> {
        self.channel
            .basic_publish(
                EXCHANGE_NAME,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await?
            .await?;

        tracing::debug!(routing_key = %routing_key, "job published");
        Ok(())
    }

    /// Declare a queue, bind it to routing keys, and start consuming
    pub async fn subscribe(
        &self,
        queue_name: &str,
        routing_keys: &[&str],
        prefetch: u16,
    ) -> Result<Consumer, lapin::Error> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for key in routing_keys {
            self.channel
                .queue_bind(
                    queue_name,
                    EXCHANGE_NAME,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self.channel
            .basic_consume(
                queue_name,
                &format!("{queue_name}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            queue = %queue_name,
            bindings = ?routing_keys,
            "subscribed to RabbitMQ queue"
        );

        Ok(consumer)
    }

}

#[async_trait]
impl JobQueue for RabbitMQClient {
    async fn enqueue(&self, job: &Job) -> AppResult<()> {
        let payload = job.to_envelope(&self.source).map_err(|e| {
            tracing::error!(error = %e, "failed to serialize job");
            AppError::internal("failed to serialize job")
        })?;

        self.publish(job.routing_key(), &payload)
            .await
            .map_err(|e| AppError::internal(format!("failed to publish job: {e}")))
    }

    fn is_ready(&self) -> bool {
        self.channel.status().connected()
    }
}
