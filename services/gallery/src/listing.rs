//! Read path: merge uploaded images with their analysis records.
//!
//! An image is "analyzed" exactly when a parseable record exists under
//! its metadata key. A record that fails to parse is reported as not
//! analyzed rather than failing the whole listing; the analyzer will
//! overwrite it on the next redelivery anyway.

use chrono::{DateTime, Utc};
use iris_core::model::{metadata_key, AnalysisRecord};
use iris_core::store::{ArtifactStore, StoreError};
use serde::Serialize;
use tracing::warn;

/// One image in the listing
#[derive(Debug, Clone, Serialize)]
pub struct ImageEntry {
    /// Artifact name within the images namespace
    pub name: String,
    /// Whether an analysis record exists for it
    pub analyzed: bool,
    /// Caption from the record, when analyzed
    pub description: Option<String>,
    /// Upload time
    pub uploaded_at: DateTime<Utc>,
}

/// List images, newest first, optionally filtered by a case-insensitive
/// substring match on the name.
pub async fn list_images(
    images: &dyn ArtifactStore,
    metadata: &dyn ArtifactStore,
    search: Option<&str>,
) -> Result<Vec<ImageEntry>, StoreError> {
    let needle = search.map(str::to_lowercase);
    let mut entries = Vec::new();

    for object in images.list(None).await? {
        if let Some(ref needle) = needle {
            if !object.name.to_lowercase().contains(needle.as_str()) {
                continue;
            }
        }

        let (analyzed, description) = match metadata.get(&metadata_key(&object.name)).await {
            Ok(bytes) => match serde_json::from_slice::<AnalysisRecord>(&bytes) {
                Ok(record) => (true, record.caption),
                Err(e) => {
                    warn!(artifact = %object.name, error = %e, "Ignoring malformed analysis record");
                    (false, None)
                }
            },
            Err(StoreError::NotFound(_)) => (false, None),
            Err(other) => return Err(other),
        };

        entries.push(ImageEntry {
            name: object.name,
            analyzed,
            description,
            uploaded_at: object.created_at,
        });
    }

    entries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
    Ok(entries)
}
