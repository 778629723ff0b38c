//! SQS-backed work queue.
//!
//! SQS natively provides the contract `WorkQueue` asks for: per-message
//! visibility timeouts, claim receipts, at-least-once delivery, and a
//! broker-side max-receive poison policy via its redrive configuration.

use crate::queue::{QueueError, ReceivedMessage, WorkQueue};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Builder as SqsConfigBuilder;
use aws_sdk_sqs::Client as SqsClient;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// SQS connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct SqsSettings {
    /// Full queue URL
    pub queue_url: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, ElasticMQ, etc.)
    pub endpoint_url: Option<String>,
    /// Long-poll wait per receive call, bounded by SQS at 20s
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_wait_time_secs() -> u64 {
    5
}

/// Work queue on one SQS queue.
pub struct SqsWorkQueue {
    client: SqsClient,
    queue_url: String,
    wait_time_secs: i32,
}

impl SqsWorkQueue {
    /// Build a client from settings.
    pub async fn new(settings: &SqsSettings) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = SqsConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = settings.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        let client = SqsClient::from_conf(builder.build());

        info!(queue_url = %settings.queue_url, "SQS work queue initialized");

        Self {
            client,
            queue_url: settings.queue_url.clone(),
            wait_time_secs: settings.wait_time_secs.min(20) as i32,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsWorkQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        // Payloads are base64 text by construction; SQS bodies are strings.
        let body = String::from_utf8(payload)
            .map_err(|e| QueueError::Publish(format!("payload is not valid UTF-8: {}", e)))?;

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .visibility_timeout(visibility_timeout.as_secs() as i32)
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        let Some(message) = response.messages().first() else {
            return Ok(None);
        };

        let receipt = message
            .receipt_handle()
            .ok_or_else(|| QueueError::Receive("message has no receipt handle".to_string()))?
            .to_string();

        let payload = message.body().unwrap_or_default().as_bytes().to_vec();

        Ok(Some(ReceivedMessage { payload, receipt }))
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| QueueError::Acknowledge(e.to_string()))?;

        Ok(())
    }
}
