//! Work queue abstraction.
//!
//! Delivery is at-least-once: a received message stays on the queue,
//! hidden for the visibility timeout, until a consumer acknowledges it.
//! A consumer that dies or fails mid-message simply lets the timeout
//! lapse and the message becomes claimable again. There is no ordering
//! guarantee across messages.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Errors that can occur talking to the work queue
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("failed to acknowledge message: {0}")]
    Acknowledge(String),
}

/// A claimed message: the payload plus the receipt needed to delete it
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Opaque transit payload
    pub payload: Vec<u8>,
    /// Claim receipt, valid for the current visibility window only
    pub receipt: String,
}

/// Durable at-least-once delivery queue carrying work references.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Publish one message.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Claim at most one message, hiding it from other consumers for
    /// `visibility_timeout`. Returns `None` when the queue is empty.
    async fn receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Delete a claimed message. The only way a message leaves the queue.
    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError>;
}

struct MemoryMessage {
    payload: Vec<u8>,
    /// Receipt of the current claim; rotates on every delivery so a stale
    /// receipt from an expired claim cannot delete the message.
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

/// In-memory queue with real visibility-timeout semantics.
///
/// Redelivery after timeout expiry is modeled faithfully so that the
/// analyzer's at-least-once tests exercise the same contract SQS gives
/// in production. Works under `tokio::time::pause`.
#[derive(Default)]
pub struct MemoryWorkQueue {
    messages: Mutex<Vec<MemoryMessage>>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages still on the queue, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.messages.lock().unwrap().push(MemoryMessage {
            payload,
            receipt: None,
            invisible_until: None,
        });
        Ok(())
    }

    async fn receive(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let now = Instant::now();
        let mut messages = self.messages.lock().unwrap();

        let Some(message) = messages
            .iter_mut()
            .find(|m| m.invisible_until.map_or(true, |t| t <= now))
        else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        message.receipt = Some(receipt.clone());
        message.invisible_until = Some(now + visibility_timeout);

        Ok(Some(ReceivedMessage {
            payload: message.payload.clone(),
            receipt,
        }))
    }

    async fn acknowledge(&self, receipt: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock().unwrap();
        let before = messages.len();
        messages.retain(|m| m.receipt.as_deref() != Some(receipt));

        if messages.len() == before {
            return Err(QueueError::Acknowledge(format!(
                "unknown or expired receipt: {}",
                receipt
            )));
        }
        Ok(())
    }
}
