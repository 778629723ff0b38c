//! HTTP client for a Vision-style image analysis REST API.
//!
//! One POST per artifact carrying the raw image bytes, with the requested
//! features as a query parameter. Transient failures are retried with
//! exponential backoff before the error is surfaced to the caller:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use crate::vision::{
    Analysis, BoundingBox, Caption, DetectedObject, Features, ImageAnalyzer, Tag, TextBlock,
    VisionError,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Vision endpoint settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VisionSettings {
    /// Base endpoint URL, e.g. `https://myaccount.cognitiveservices.azure.com`
    pub endpoint: String,
    /// API key sent with every request
    pub key: String,
    /// API version query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Image analyzer backed by a Vision-style REST endpoint.
pub struct HttpVisionClient {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    api_version: String,
    max_retries: u32,
}

impl HttpVisionClient {
    pub fn new(settings: &VisionSettings) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| VisionError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            key: settings.key.clone(),
            api_version: settings.api_version.clone(),
            max_retries: settings.max_retries,
        })
    }

    fn analyze_url(&self, features: Features) -> String {
        format!(
            "{}/computervision/imageanalysis:analyze?api-version={}&features={}",
            self.endpoint,
            self.api_version,
            features.to_query_param()
        )
    }
}

#[async_trait]
impl ImageAnalyzer for HttpVisionClient {
    async fn analyze(&self, bytes: &[u8], features: Features) -> Result<Analysis, VisionError> {
        let url = self.analyze_url(features);
        let mut last_err: Option<VisionError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "Retrying analysis request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Ocp-Apim-Subscription-Key", &self.key)
                .header("Content-Type", "application/octet-stream")
                .body(bytes.to_vec())
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let dto: AnalyzeResponse = response
                            .json()
                            .await
                            .map_err(|e| VisionError::Decode(e.to_string()))?;
                        debug!("Analysis request succeeded");
                        return Ok(dto.into());
                    }

                    let body = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(VisionError::Status {
                            status: status.as_u16(),
                            body,
                        });
                        continue;
                    }

                    // Other client errors will not get better on retry
                    return Err(VisionError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    last_err = Some(VisionError::Request(e.to_string()));
                    continue;
                }
            }
        }

        Err(VisionError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

// Wire DTOs for the provider response. Only the fields the record needs
// are modeled; everything else is ignored on deserialization.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    caption_result: Option<CaptionResult>,
    tags_result: Option<TagsResult>,
    objects_result: Option<ObjectsResult>,
    read_result: Option<ReadResult>,
}

#[derive(Debug, Deserialize)]
struct CaptionResult {
    text: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct TagsResult {
    #[serde(default)]
    values: Vec<TagDto>,
}

#[derive(Debug, Deserialize)]
struct TagDto {
    name: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ObjectsResult {
    #[serde(default)]
    values: Vec<ObjectDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectDto {
    bounding_box: BoundingBoxDto,
    #[serde(default)]
    tags: Vec<TagDto>,
}

#[derive(Debug, Deserialize)]
struct BoundingBoxDto {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    #[serde(default)]
    blocks: Vec<BlockDto>,
}

#[derive(Debug, Deserialize)]
struct BlockDto {
    #[serde(default)]
    lines: Vec<LineDto>,
}

#[derive(Debug, Deserialize)]
struct LineDto {
    text: String,
}

impl From<TagDto> for Tag {
    fn from(dto: TagDto) -> Self {
        Tag {
            name: dto.name,
            confidence: dto.confidence,
        }
    }
}

impl From<AnalyzeResponse> for Analysis {
    fn from(dto: AnalyzeResponse) -> Self {
        let caption = dto.caption_result.map(|c| Caption {
            text: c.text,
            confidence: c.confidence,
        });

        let tags = dto
            .tags_result
            .map(|t| t.values.into_iter().map(Tag::from).collect())
            .unwrap_or_default();

        let objects = dto
            .objects_result
            .map(|o| {
                o.values
                    .into_iter()
                    .map(|obj| DetectedObject {
                        labels: obj.tags.into_iter().map(Tag::from).collect(),
                        bounding_box: BoundingBox {
                            x: obj.bounding_box.x,
                            y: obj.bounding_box.y,
                            w: obj.bounding_box.w,
                            h: obj.bounding_box.h,
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        let text_blocks = dto
            .read_result
            .map(|r| {
                r.blocks
                    .into_iter()
                    .map(|b| TextBlock {
                        lines: b.lines.into_iter().map(|l| l.text).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Analysis {
            caption,
            tags,
            objects,
            text_blocks,
        }
    }
}
