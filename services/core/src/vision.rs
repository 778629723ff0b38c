//! Vision provider abstraction.
//!
//! `Analysis` is the provider-neutral result of one analysis call. The
//! analyzer asks for every capability it needs in a single call; one
//! round trip per artifact amortizes provider latency and cost.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur calling the vision provider
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("analysis request failed: {0}")]
    Request(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("analysis failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Capabilities requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub caption: bool,
    pub tags: bool,
    pub objects: bool,
    pub read: bool,
}

impl Features {
    /// Everything the analyzer persists, batched into one call.
    pub fn all() -> Self {
        Self {
            caption: true,
            tags: true,
            objects: true,
            read: true,
        }
    }

    /// Comma-separated feature list in provider query-parameter form.
    pub fn to_query_param(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        if self.caption {
            parts.push("caption");
        }
        if self.tags {
            parts.push("tags");
        }
        if self.objects {
            parts.push("objects");
        }
        if self.read {
            parts.push("read");
        }
        parts.join(",")
    }
}

/// Image caption with the provider's confidence in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub confidence: f64,
}

/// A content label with confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub confidence: f64,
}

/// Pixel rectangle within the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// One detected object: its sub-labels in provider rank order plus the
/// region it covers. The label list may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub labels: Vec<Tag>,
    pub bounding_box: BoundingBox,
}

/// A block of recognized text, line by line in reading order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub lines: Vec<String>,
}

/// Provider-neutral result of one analysis call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Analysis {
    pub caption: Option<Caption>,
    pub tags: Vec<Tag>,
    pub objects: Vec<DetectedObject>,
    pub text_blocks: Vec<TextBlock>,
}

/// External capability turning image bytes into structured analysis.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    /// Analyze one image with the requested capabilities.
    async fn analyze(&self, bytes: &[u8], features: Features) -> Result<Analysis, VisionError>;
}
