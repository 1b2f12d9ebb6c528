use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::grounding::Rect;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ocr service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ocr response: {0}")]
    Decode(String),
}

/// One detected text region, in screenshot pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrBox {
    pub text: String,
    pub confidence: f64,
    pub rect: Rect,
}

#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, png: &[u8]) -> Result<Vec<OcrBox>, OcrError>;
}

#[derive(Clone, Debug)]
pub struct OcrConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("OCR_SERVER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/ocr/".to_string()),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Talks to an OCR server that accepts `{"img_bytes": <base64 png>}` and answers
/// `{"results": [{"text", "confidence", "bbox": [x1, y1, x2, y2]}]}`.
pub struct HttpTextDetector {
    http: reqwest::Client,
    cfg: OcrConfig,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    results: Vec<OcrResult>,
}

#[derive(Deserialize)]
struct OcrResult {
    text: String,
    #[serde(default)]
    confidence: f64,
    bbox: [f64; 4],
}

impl HttpTextDetector {
    pub fn new(cfg: OcrConfig) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl TextDetector for HttpTextDetector {
    async fn detect(&self, png: &[u8]) -> Result<Vec<OcrBox>, OcrError> {
        let body = serde_json::json!({
            "img_bytes": base64::engine::general_purpose::STANDARD.encode(png),
        });
        let resp = self.http.post(&self.cfg.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OcrError::Status { status: status.as_u16(), body });
        }
        let parsed: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::Decode(e.to_string()))?;
        debug!(boxes = parsed.results.len(), "ocr detection finished");

        Ok(parsed
            .results
            .into_iter()
            .map(|r| {
                let [x1, y1, x2, y2] = r.bbox;
                OcrBox {
                    text: r.text,
                    confidence: r.confidence,
                    rect: Rect::from_corners(x1, y1, x2, y2),
                }
            })
            .collect())
    }
}

/// Returns a fixed set of boxes; for tests and offline runs.
#[derive(Clone, Debug, Default)]
pub struct FixedTextDetector {
    pub boxes: Vec<OcrBox>,
}

#[async_trait]
impl TextDetector for FixedTextDetector {
    async fn detect(&self, _png: &[u8]) -> Result<Vec<OcrBox>, OcrError> {
        Ok(self.boxes.clone())
    }
}
