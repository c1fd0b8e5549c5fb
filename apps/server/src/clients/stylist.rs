use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::booking::error::AnalysisError;
use crate::booking::session::ReferenceImage;
use crate::models::JewelryItem;

/// One suggested piercing placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub location: String,
    pub jewelry_id: i64,
    /// Relative position on the reference image, 0.0..=1.0.
    pub x: f64,
    pub y: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylistResult {
    pub style_summary: String,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

/// Image in, placement recommendations out.
#[async_trait]
pub trait Stylist: Send + Sync {
    async fn analyze(
        &self,
        image: &ReferenceImage,
        catalog: &[JewelryItem],
    ) -> Result<StylistResult, AnalysisError>;
}

/// Calls a JSON analysis endpoint with bearer auth.
pub struct HttpStylist {
    http: reqwest::Client,
    endpoint: Option<Url>,
    api_key: Option<String>,
}

impl HttpStylist {
    pub fn new(endpoint: Option<Url>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl Stylist for HttpStylist {
    async fn analyze(
        &self,
        image: &ReferenceImage,
        catalog: &[JewelryItem],
    ) -> Result<StylistResult, AnalysisError> {
        let endpoint = self.endpoint.clone().ok_or(AnalysisError::NotConfigured)?;
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(AnalysisError::NotConfigured)?;

        let inventory: Vec<serde_json::Value> = catalog
            .iter()
            .filter(|j| j.in_stock)
            .map(|j| serde_json::json!({ "id": j.id, "name": j.name, "category": j.category }))
            .collect();

        let body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
            "mime_type": image.mime,
            "inventory": inventory,
        });

        let resp = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("Stylist analysis failed: {} - {}", status, text);
            return Err(AnalysisError::Rejected(status.as_u16()));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?;
        let result = parse_reply(&text)?;

        tracing::info!(
            "Stylist analysis for image {}: {} recommendations",
            &image.digest[..12.min(image.digest.len())],
            result.recommendations.len()
        );
        Ok(result)
    }
}

/// Model replies sometimes arrive wrapped in a Markdown code fence.
pub fn parse_reply(text: &str) -> Result<StylistResult, AnalysisError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).map_err(|e| AnalysisError::Malformed(e.to_string()))
}
