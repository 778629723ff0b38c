//! Artifact store abstraction.
//!
//! The platform keeps two logical namespaces in object storage: uploaded
//! images and their metadata documents. Services hold one `ArtifactStore`
//! handle per namespace and never see the other's keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur talking to an artifact store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Request(String),
}

/// Listing projection of a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Object name within the namespace
    pub name: String,
    /// Creation time; for immutable objects this is the upload time
    pub created_at: DateTime<Utc>,
}

/// Named binary object storage for one namespace.
///
/// Writes are full overwrites; there is no append. `put` must not return
/// before the object is durable, since the analyzer acknowledges queue
/// messages on the strength of that guarantee.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an object, replacing any existing object with the same name.
    /// Returns the stored name.
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;

    /// Fetch an object's bytes. `StoreError::NotFound` when absent.
    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Check whether an object exists.
    async fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// List objects, optionally restricted to a name prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<StoredObject>, StoreError>;

    /// Produce a time-limited display URL for an object, if the backend
    /// supports one. Backends without URL support return `Ok(None)`.
    async fn url_for(&self, _name: &str, _expiry: Duration) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// In-memory artifact store for tests and local development.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, MemoryObject>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit creation time. Listing order
    /// tests need timestamps further apart than `put` produces.
    pub fn put_at(&self, name: &str, bytes: Vec<u8>, content_type: &str, at: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            name.to_string(),
            MemoryObject {
                bytes,
                content_type: content_type.to_string(),
                created_at: at,
            },
        );
    }

    /// Content type recorded for an object, if present.
    pub fn content_type_of(&self, name: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|o| o.content_type.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.put_at(name, bytes, content_type, Utc::now());
        Ok(name.to_string())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.objects.lock().unwrap().contains_key(name))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<StoredObject>, StoreError> {
        let objects = self.objects.lock().unwrap();
        let mut listed: Vec<StoredObject> = objects
            .iter()
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, obj)| StoredObject {
                name: name.clone(),
                created_at: obj.created_at,
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }
}
