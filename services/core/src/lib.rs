//! Iris Core - shared building blocks for the Iris image analysis platform
//!
//! This library provides the pieces shared by the Iris services:
//!
//! - The work message and metadata record data model
//! - The `ArtifactStore`, `WorkQueue` and `ImageAnalyzer` collaborator traits
//! - Production clients backed by S3, SQS and a Vision-style HTTP API
//! - In-memory implementations for tests and local development
//!
//! # Example
//!
//! ```rust,no_run
//! use iris_core::model::WorkItem;
//! use iris_core::queue::{MemoryWorkQueue, WorkQueue};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = MemoryWorkQueue::new();
//!     let item = WorkItem::new("photo.jpg");
//!     queue.publish(item.encode()).await?;
//!     Ok(())
//! }
//! ```

pub mod model;
pub mod queue;
pub mod sqs_queue;
pub mod store;
pub mod s3_store;
pub mod vision;
pub mod vision_http;

// Re-export main types
pub use model::{metadata_key, AnalysisRecord, ObjectRecord, WorkItem, WorkItemDecodeError};
pub use queue::{MemoryWorkQueue, QueueError, ReceivedMessage, WorkQueue};
pub use s3_store::{S3ArtifactStore, S3Settings};
pub use sqs_queue::{SqsSettings, SqsWorkQueue};
pub use store::{ArtifactStore, MemoryArtifactStore, StoreError, StoredObject};
pub use vision::{
    Analysis, BoundingBox, Caption, DetectedObject, Features, ImageAnalyzer, Tag, TextBlock,
    VisionError,
};
pub use vision_http::{HttpVisionClient, VisionSettings};
