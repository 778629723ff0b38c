//! The analysis worker loop.
//!
//! One `Worker` drains the work queue sequentially: claim one message,
//! decode it, fetch the referenced image, run the vision provider,
//! persist the metadata record, and only then acknowledge the message.
//! Acknowledgment after durable persistence is the whole correctness
//! story; everything that fails earlier simply leaves the message to
//! reappear after the visibility timeout, and the overwriting metadata
//! write makes that redelivery harmless.
//!
//! Parallelism is achieved by running more worker instances against the
//! same queue, never by concurrency inside one instance.

use crate::config::{MissingArtifactPolicy, WorkerConfig};
use iris_core::model::{metadata_key, AnalysisRecord, WorkItem, WorkItemDecodeError};
use iris_core::store::{ArtifactStore, StoreError};
use iris_core::vision::{Features, ImageAnalyzer, VisionError};
use iris_core::queue::{QueueError, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why processing one message failed
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] WorkItemDecodeError),

    #[error("artifact not found: {artifact}")]
    ArtifactMissing { artifact: String },

    #[error("failed to fetch artifact {artifact}: {source}")]
    Fetch {
        artifact: String,
        source: StoreError,
    },

    #[error("analysis failed for artifact {artifact}: {source}")]
    Provider {
        artifact: String,
        source: VisionError,
    },

    #[error("failed to persist record for artifact {artifact}: {source}")]
    Persistence {
        artifact: String,
        source: StoreError,
    },
}

impl ProcessError {
    /// Failure kind for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::MalformedMessage(_) => "malformed_message",
            ProcessError::ArtifactMissing { .. } => "artifact_missing",
            ProcessError::Fetch { .. } => "fetch",
            ProcessError::Provider { .. } => "provider",
            ProcessError::Persistence { .. } => "persistence",
        }
    }

    /// Artifact the message referenced, when decoding got that far.
    pub fn artifact(&self) -> Option<&str> {
        match self {
            ProcessError::MalformedMessage(_) => None,
            ProcessError::ArtifactMissing { artifact }
            | ProcessError::Fetch { artifact, .. }
            | ProcessError::Provider { artifact, .. }
            | ProcessError::Persistence { artifact, .. } => Some(artifact),
        }
    }
}

/// Tunables injected into the worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long a claimed message stays hidden from other workers
    pub visibility_timeout: Duration,
    /// Sleep between polls when the queue is empty
    pub idle_delay: Duration,
    /// Policy for messages referencing a missing artifact
    pub missing_artifact: MissingArtifactPolicy,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            idle_delay: Duration::from_secs(config.idle_delay_secs),
            missing_artifact: config.missing_artifact,
        }
    }
}

/// The queue-driven analysis worker.
///
/// Owns its collaborator handles; nothing here is ambient or global, so
/// several workers can coexist in one process with different wiring.
pub struct Worker {
    images: Arc<dyn ArtifactStore>,
    metadata: Arc<dyn ArtifactStore>,
    queue: Arc<dyn WorkQueue>,
    analyzer: Arc<dyn ImageAnalyzer>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        images: Arc<dyn ArtifactStore>,
        metadata: Arc<dyn ArtifactStore>,
        queue: Arc<dyn WorkQueue>,
        analyzer: Arc<dyn ImageAnalyzer>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            images,
            metadata,
            queue,
            analyzer,
            settings,
        }
    }

    /// Drain the queue until the token is cancelled.
    ///
    /// Cancellation is checked between iterations only; an in-flight
    /// message always finishes, so a shutdown never leaves a half-done
    /// acknowledgment behind. Per-message failures are logged and never
    /// terminate the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            visibility_timeout_secs = self.settings.visibility_timeout.as_secs(),
            idle_delay_secs = self.settings.idle_delay.as_secs(),
            "Worker started"
        );

        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => self.idle(&cancel).await,
                Err(e) => {
                    // Queue trouble; take the idle path so a broken broker
                    // does not turn into a tight error loop.
                    error!(error = %e, "Queue receive failed");
                    metrics::counter!("analyzer.queue.receive_errors").increment(1);
                    self.idle(&cancel).await;
                }
            }
        }

        info!("Worker stopped");
    }

    /// Claim and handle at most one message. Returns whether a message
    /// was available.
    async fn poll_once(&self) -> Result<bool, QueueError> {
        let Some(message) = self.queue.receive(self.settings.visibility_timeout).await? else {
            return Ok(false);
        };

        let started = std::time::Instant::now();

        match self.process_one(&message.payload).await {
            Ok(artifact) => {
                metrics::counter!("analyzer.messages.processed").increment(1);
                metrics::histogram!("analyzer.processing.duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                // The record is already durable; if the delete fails the
                // message comes back and reprocessing overwrites in place.
                if let Err(e) = self.queue.acknowledge(&message.receipt).await {
                    warn!(artifact = %artifact, error = %e, "Failed to acknowledge message");
                    metrics::counter!("analyzer.messages.ack_failed").increment(1);
                } else {
                    info!(artifact = %artifact, "Message processed and acknowledged");
                }
            }
            Err(err) => {
                metrics::counter!("analyzer.messages.failed", "kind" => err.kind()).increment(1);

                match err.artifact() {
                    Some(artifact) => {
                        warn!(artifact = %artifact, kind = err.kind(), error = %err, "Failed to process message")
                    }
                    None => warn!(kind = err.kind(), error = %err, "Failed to process message"),
                }

                let drop_message = matches!(err, ProcessError::ArtifactMissing { .. })
                    && self.settings.missing_artifact == MissingArtifactPolicy::Acknowledge;

                if drop_message {
                    if let Err(e) = self.queue.acknowledge(&message.receipt).await {
                        warn!(error = %e, "Failed to drop missing-artifact message");
                    }
                }
                // Otherwise the message is left unacknowledged and becomes
                // claimable again after the visibility timeout.
            }
        }

        Ok(true)
    }

    /// Process one claimed message end to end.
    ///
    /// Returns the artifact id on success, after the metadata write is
    /// confirmed durable. Performs no writes on any failure path.
    #[instrument(skip(self, payload))]
    pub async fn process_one(&self, payload: &[u8]) -> Result<String, ProcessError> {
        let item = WorkItem::decode(payload)?;
        let artifact = item.artifact_id;

        debug!(artifact = %artifact, "Processing work item");

        let bytes = self.images.get(&artifact).await.map_err(|e| match e {
            StoreError::NotFound(_) => ProcessError::ArtifactMissing {
                artifact: artifact.clone(),
            },
            other => ProcessError::Fetch {
                artifact: artifact.clone(),
                source: other,
            },
        })?;

        // One batched provider call for everything the record needs
        let analysis = self
            .analyzer
            .analyze(&bytes, Features::all())
            .await
            .map_err(|e| ProcessError::Provider {
                artifact: artifact.clone(),
                source: e,
            })?;

        let record = AnalysisRecord::from_analysis(&artifact, &analysis);

        self.metadata
            .put(
                &metadata_key(&artifact),
                record.to_pretty_json(),
                "application/json",
            )
            .await
            .map_err(|e| ProcessError::Persistence {
                artifact: artifact.clone(),
                source: e,
            })?;

        debug!(artifact = %artifact, "Record persisted");
        Ok(artifact)
    }

    /// Cancellation-aware idle sleep.
    async fn idle(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.settings.idle_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iris_core::model::ObjectRecord;
    use iris_core::queue::MemoryWorkQueue;
    use iris_core::store::{MemoryArtifactStore, StoredObject};
    use iris_core::vision::{Analysis, BoundingBox, Caption, DetectedObject, Tag, TextBlock};
    use std::sync::Mutex;

    /// Analyzer double returning a queued sequence of results.
    struct StubAnalyzer {
        results: Mutex<Vec<Result<Analysis, VisionError>>>,
    }

    impl StubAnalyzer {
        fn returning(analysis: Analysis) -> Self {
            Self {
                results: Mutex::new(vec![Ok(analysis)]),
            }
        }

        fn sequence(results: Vec<Result<Analysis, VisionError>>) -> Self {
            Self {
                results: Mutex::new(results),
            }
        }

        fn failing() -> Self {
            Self::sequence(vec![Err(VisionError::Request("connection refused".into()))])
        }
    }

    #[async_trait]
    impl ImageAnalyzer for StubAnalyzer {
        async fn analyze(&self, _bytes: &[u8], _features: Features) -> Result<Analysis, VisionError> {
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                return Ok(Analysis::default());
            }
            results.remove(0)
        }
    }

    /// Store double whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl ArtifactStore for BrokenStore {
        async fn put(&self, _: &str, _: Vec<u8>, _: &str) -> Result<String, StoreError> {
            Err(StoreError::Request("disk on fire".into()))
        }
        async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(name.to_string()))
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn list(&self, _: Option<&str>) -> Result<Vec<StoredObject>, StoreError> {
            Ok(vec![])
        }
    }

    fn sample_analysis() -> Analysis {
        Analysis {
            caption: Some(Caption {
                text: "a dog".to_string(),
                confidence: 0.98,
            }),
            tags: vec![
                Tag {
                    name: "dog".to_string(),
                    confidence: 0.99,
                },
                Tag {
                    name: "outdoor".to_string(),
                    confidence: 0.8,
                },
            ],
            objects: vec![DetectedObject {
                labels: vec![Tag {
                    name: "dog".to_string(),
                    confidence: 0.9,
                }],
                bounding_box: BoundingBox {
                    x: 0,
                    y: 0,
                    w: 10,
                    h: 10,
                },
            }],
            text_blocks: vec![TextBlock {
                lines: vec!["HELLO".to_string(), "WORLD".to_string()],
            }],
        }
    }

    struct Harness {
        images: Arc<MemoryArtifactStore>,
        metadata: Arc<MemoryArtifactStore>,
        queue: Arc<MemoryWorkQueue>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                images: Arc::new(MemoryArtifactStore::new()),
                metadata: Arc::new(MemoryArtifactStore::new()),
                queue: Arc::new(MemoryWorkQueue::new()),
            }
        }

        fn worker(&self, analyzer: Arc<dyn ImageAnalyzer>) -> Worker {
            self.worker_with_policy(analyzer, MissingArtifactPolicy::Redeliver)
        }

        fn worker_with_policy(
            &self,
            analyzer: Arc<dyn ImageAnalyzer>,
            policy: MissingArtifactPolicy,
        ) -> Worker {
            Worker::new(
                self.images.clone(),
                self.metadata.clone(),
                self.queue.clone(),
                analyzer,
                WorkerSettings {
                    visibility_timeout: Duration::from_secs(30),
                    idle_delay: Duration::from_secs(2),
                    missing_artifact: policy,
                },
            )
        }

        async fn stored_record(&self, artifact: &str) -> AnalysisRecord {
            let bytes = self.metadata.get(&metadata_key(artifact)).await.unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    #[tokio::test]
    async fn test_process_one_persists_record() {
        let h = Harness::new();
        h.images.put("dog.jpg", vec![0xff], "image/jpeg").await.unwrap();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        let artifact = worker
            .process_one(&WorkItem::new("dog.jpg").encode())
            .await
            .unwrap();
        assert_eq!(artifact, "dog.jpg");

        let record = h.stored_record("dog.jpg").await;
        assert_eq!(
            record,
            AnalysisRecord {
                artifact: "dog.jpg".to_string(),
                caption: Some("a dog".to_string()),
                tags: vec!["dog".to_string(), "outdoor".to_string()],
                objects: vec![ObjectRecord {
                    label: Some("dog".to_string()),
                    confidence: Some(0.9),
                    bounding_region: BoundingBox {
                        x: 0,
                        y: 0,
                        w: 10,
                        h: 10
                    },
                }],
                text: Some("HELLO WORLD".to_string()),
            }
        );
        assert_eq!(
            h.metadata.content_type_of("dog.jpg.json").unwrap(),
            "application/json"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_acknowledges_message() {
        let h = Harness::new();
        h.images.put("dog.jpg", vec![0xff], "image/jpeg").await.unwrap();
        h.queue.publish(WorkItem::new("dog.jpg").encode()).await.unwrap();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        assert!(worker.poll_once().await.unwrap());
        assert!(h.queue.is_empty());

        // Well past any visibility window: still gone, not merely hidden
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(h.queue.receive(Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reprocessing_overwrites_record() {
        let h = Harness::new();
        h.images.put("dog.jpg", vec![0xff], "image/jpeg").await.unwrap();

        let second = Analysis {
            caption: Some(Caption {
                text: "two dogs".to_string(),
                confidence: 0.9,
            }),
            ..Analysis::default()
        };
        let worker = h.worker(Arc::new(StubAnalyzer::sequence(vec![
            Ok(sample_analysis()),
            Ok(second),
        ])));

        let payload = WorkItem::new("dog.jpg").encode();
        worker.process_one(&payload).await.unwrap();
        worker.process_one(&payload).await.unwrap();

        // One record, reflecting the second run
        assert_eq!(h.metadata.len(), 1);
        let record = h.stored_record("dog.jpg").await;
        assert_eq!(record.caption.as_deref(), Some("two dogs"));
        assert!(record.tags.is_empty());
    }

    #[tokio::test]
    async fn test_empty_artifact_id_is_malformed_and_writes_nothing() {
        let h = Harness::new();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        let err = worker
            .process_one(&WorkItem::new("").encode())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::MalformedMessage(_)));
        assert_eq!(err.artifact(), None);
        assert!(h.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_malformed() {
        let h = Harness::new();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        let err = worker.process_one(b"!!definitely not base64!!").await.unwrap_err();
        assert_eq!(err.kind(), "malformed_message");
        assert!(h.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_writes_nothing() {
        let h = Harness::new();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        let err = worker
            .process_one(&WorkItem::new("ghost.jpg").encode())
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::ArtifactMissing { ref artifact } if artifact == "ghost.jpg"));
        assert!(h.metadata.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_artifact_default_policy_leaves_message() {
        let h = Harness::new();
        h.queue.publish(WorkItem::new("ghost.jpg").encode()).await.unwrap();
        let worker = h.worker(Arc::new(StubAnalyzer::returning(sample_analysis())));

        assert!(worker.poll_once().await.unwrap());
        assert_eq!(h.queue.len(), 1);

        // Redeliverable once the visibility window lapses
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(h.queue.receive(Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_artifact_acknowledge_policy_drops_message() {
        let h = Harness::new();
        h.queue.publish(WorkItem::new("ghost.jpg").encode()).await.unwrap();
        let worker = h.worker_with_policy(
            Arc::new(StubAnalyzer::returning(sample_analysis())),
            MissingArtifactPolicy::Acknowledge,
        );

        assert!(worker.poll_once().await.unwrap());
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_leaves_message_and_writes_nothing() {
        let h = Harness::new();
        h.images.put("dog.jpg", vec![0xff], "image/jpeg").await.unwrap();
        h.queue.publish(WorkItem::new("dog.jpg").encode()).await.unwrap();
        let worker = h.worker(Arc::new(StubAnalyzer::failing()));

        assert!(worker.poll_once().await.unwrap());
        assert!(h.metadata.is_empty());
        assert_eq!(h.queue.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(h.queue.receive(Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces_as_persistence_error() {
        let h = Harness::new();
        h.images.put("dog.jpg", vec![0xff], "image/jpeg").await.unwrap();
        let worker = Worker::new(
            h.images.clone(),
            Arc::new(BrokenStore),
            h.queue.clone(),
            Arc::new(StubAnalyzer::returning(sample_analysis())),
            WorkerSettings {
                visibility_timeout: Duration::from_secs(30),
                idle_delay: Duration::from_secs(2),
                missing_artifact: MissingArtifactPolicy::Redeliver,
            },
        );

        let err = worker
            .process_one(&WorkItem::new("dog.jpg").encode())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert_eq!(err.artifact(), Some("dog.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let h = Harness::new();
        let worker = Arc::new(h.worker(Arc::new(StubAnalyzer::returning(Analysis::default()))));
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        // Let the loop reach its idle sleep, then cancel
        tokio::time::advance(Duration::from_secs(1)).await;
        cancel.cancel();

        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_then_idles() {
        let h = Harness::new();
        h.images.put("a.jpg", vec![1], "image/jpeg").await.unwrap();
        h.images.put("b.jpg", vec![2], "image/jpeg").await.unwrap();
        h.queue.publish(WorkItem::new("a.jpg").encode()).await.unwrap();
        h.queue.publish(WorkItem::new("b.jpg").encode()).await.unwrap();

        let worker = Arc::new(h.worker(Arc::new(StubAnalyzer::sequence(vec![
            Ok(sample_analysis()),
            Ok(sample_analysis()),
        ]))));
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        tokio::time::advance(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(h.queue.is_empty());
        assert_eq!(h.metadata.len(), 2);
    }
}
