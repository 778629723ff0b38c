//! Work message and metadata record data model.
//!
//! A `WorkItem` is the small reference published to the work queue when an
//! image is uploaded. An `AnalysisRecord` is the document the analyzer
//! persists next to the image once the vision provider has looked at it.
//! The record's presence under `metadata_key(artifact_id)` is the only
//! "analyzed" flag the platform has; a failed analysis leaves no record.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vision::{Analysis, BoundingBox};

/// Errors that can occur while decoding a queued work message
#[derive(Error, Debug)]
pub enum WorkItemDecodeError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("artifactId is missing or empty")]
    EmptyArtifactId,
}

/// A queued reference to one artifact pending analysis.
///
/// The wire form is the JSON document `{"artifactId": "..."}` wrapped in
/// one layer of standard base64, matching what queue transports expect
/// for binary-safe payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Name of the artifact to analyze
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
}

impl WorkItem {
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
        }
    }

    /// Encode the item for transit: JSON, then base64.
    pub fn encode(&self) -> Vec<u8> {
        let json = serde_json::to_vec(self).expect("WorkItem serialization cannot fail");
        STANDARD.encode(json).into_bytes()
    }

    /// Decode a transit payload back into a work item.
    ///
    /// The empty-id check happens here rather than in the consumer so that
    /// every caller gets the same notion of "malformed".
    pub fn decode(payload: &[u8]) -> Result<Self, WorkItemDecodeError> {
        let json = STANDARD.decode(payload)?;
        let item: WorkItem = serde_json::from_slice(&json)?;
        if item.artifact_id.is_empty() {
            return Err(WorkItemDecodeError::EmptyArtifactId);
        }
        Ok(item)
    }
}

/// One detected object within an analysis record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Primary label of the detection, if the provider attached any
    pub label: Option<String>,
    /// Confidence of the primary label, 0.0 - 1.0
    pub confidence: Option<f64>,
    /// Pixel region the detection covers
    #[serde(rename = "boundingRegion")]
    pub bounding_region: BoundingBox,
}

/// The persisted result of analyzing one artifact.
///
/// Stored pretty-printed as JSON under `metadata_key(artifact_id)`,
/// overwriting any prior record for the same artifact. That overwrite is
/// what makes queue redelivery harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Name of the source artifact (1:1, re-analysis overwrites)
    pub artifact: String,
    /// Short text summary, if the provider produced one
    pub caption: Option<String>,
    /// Label strings in provider order
    pub tags: Vec<String>,
    /// Detected objects in provider order
    pub objects: Vec<ObjectRecord>,
    /// All recognized text lines, space-joined in reading order
    pub text: Option<String>,
}

impl AnalysisRecord {
    /// Build a record from a provider analysis.
    ///
    /// The primary label of an object is the first sub-label the provider
    /// returned for it, which is not necessarily the highest-confidence
    /// one; provider ordering is taken at face value.
    pub fn from_analysis(artifact_id: impl Into<String>, analysis: &Analysis) -> Self {
        let caption = analysis.caption.as_ref().map(|c| c.text.clone());

        let tags = analysis.tags.iter().map(|t| t.name.clone()).collect();

        let objects = analysis
            .objects
            .iter()
            .map(|obj| {
                let primary = obj.labels.first();
                ObjectRecord {
                    label: primary.map(|t| t.name.clone()),
                    confidence: primary.map(|t| t.confidence),
                    bounding_region: obj.bounding_box.clone(),
                }
            })
            .collect();

        let lines: Vec<&str> = analysis
            .text_blocks
            .iter()
            .flat_map(|block| block.lines.iter().map(String::as_str))
            .collect();
        let text = if analysis.text_blocks.is_empty() {
            None
        } else {
            Some(lines.join(" "))
        };

        Self {
            artifact: artifact_id.into(),
            caption,
            tags,
            objects,
            text,
        }
    }

    /// Serialize the record the way it is persisted.
    pub fn to_pretty_json(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("AnalysisRecord serialization cannot fail")
    }
}

/// Name of the metadata document for an artifact.
///
/// Deterministic so that record existence can double as the analyzed flag
/// and so that re-analysis lands on the same key.
pub fn metadata_key(artifact_id: &str) -> String {
    format!("{}.json", artifact_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{Caption, DetectedObject, Tag, TextBlock};

    #[test]
    fn test_work_item_round_trip() {
        let item = WorkItem::new("photo-123.jpg");
        let encoded = item.encode();
        let decoded = WorkItem::decode(&encoded).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_work_item_wire_form_is_base64_json() {
        let encoded = WorkItem::new("a.png").encode();
        let json = STANDARD.decode(&encoded).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&json).unwrap(),
            serde_json::json!({"artifactId": "a.png"})
        );
    }

    #[test]
    fn test_work_item_rejects_invalid_base64() {
        let err = WorkItem::decode(b"not base64!!").unwrap_err();
        assert!(matches!(err, WorkItemDecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_work_item_rejects_invalid_json() {
        let payload = STANDARD.encode(b"{not json").into_bytes();
        let err = WorkItem::decode(&payload).unwrap_err();
        assert!(matches!(err, WorkItemDecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_work_item_rejects_missing_artifact_id() {
        let payload = STANDARD.encode(b"{\"other\":\"x\"}").into_bytes();
        let err = WorkItem::decode(&payload).unwrap_err();
        assert!(matches!(err, WorkItemDecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_work_item_rejects_empty_artifact_id() {
        let payload = STANDARD.encode(b"{\"artifactId\":\"\"}").into_bytes();
        let err = WorkItem::decode(&payload).unwrap_err();
        assert!(matches!(err, WorkItemDecodeError::EmptyArtifactId));
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

    #[test]
    fn test_record_from_analysis() {
        let record = AnalysisRecord::from_analysis("img.jpg", &sample_analysis());

        assert_eq!(record.artifact, "img.jpg");
        assert_eq!(record.caption.as_deref(), Some("a dog"));
        assert_eq!(record.tags, vec!["dog", "outdoor"]);
        assert_eq!(record.objects.len(), 1);
        assert_eq!(record.objects[0].label.as_deref(), Some("dog"));
        assert_eq!(record.objects[0].confidence, Some(0.9));
        assert_eq!(
            record.objects[0].bounding_region,
            BoundingBox {
                x: 0,
                y: 0,
                w: 10,
                h: 10
            }
        );
        assert_eq!(record.text.as_deref(), Some("HELLO WORLD"));
    }

    #[test]
    fn test_record_from_empty_analysis() {
        let record = AnalysisRecord::from_analysis("img.jpg", &Analysis::default());

        assert_eq!(record.caption, None);
        assert!(record.tags.is_empty());
        assert!(record.objects.is_empty());
        assert_eq!(record.text, None);
    }

    #[test]
    fn test_object_without_labels_keeps_region() {
        let analysis = Analysis {
            objects: vec![DetectedObject {
                labels: vec![],
                bounding_box: BoundingBox {
                    x: 1,
                    y: 2,
                    w: 3,
                    h: 4,
                },
            }],
            ..Analysis::default()
        };

        let record = AnalysisRecord::from_analysis("img.jpg", &analysis);
        assert_eq!(record.objects[0].label, None);
        assert_eq!(record.objects[0].confidence, None);
        assert_eq!(record.objects[0].bounding_region.w, 3);
    }

    #[test]
    fn test_record_json_field_names() {
        let record = AnalysisRecord::from_analysis("img.jpg", &sample_analysis());
        let json: serde_json::Value =
            serde_json::from_slice(&record.to_pretty_json()).unwrap();

        assert_eq!(json["artifact"], "img.jpg");
        assert_eq!(json["caption"], "a dog");
        assert_eq!(json["objects"][0]["boundingRegion"]["w"], 10);
        assert_eq!(json["text"], "HELLO WORLD");
    }

    #[test]
    fn test_record_json_explicit_nulls() {
        let record = AnalysisRecord::from_analysis("img.jpg", &Analysis::default());
        let json: serde_json::Value =
            serde_json::from_slice(&record.to_pretty_json()).unwrap();

        assert!(json["caption"].is_null());
        assert!(json["text"].is_null());
    }

    #[test]
    fn test_metadata_key() {
        assert_eq!(metadata_key("photo.jpg"), "photo.jpg.json");
    }
}
