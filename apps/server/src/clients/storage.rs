use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::booking::error::UploadError;
use crate::booking::session::ReferenceImage;

/// Stores an image and returns a public URL for it.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    async fn upload(&self, image: &ReferenceImage) -> Result<String, UploadError>;
}

#[derive(Deserialize)]
struct UploadReply {
    url: String,
}

/// Uploads raw bytes to an object-storage endpoint, keyed by image digest.
pub struct HttpImageStorage {
    http: reqwest::Client,
    upload_url: Option<Url>,
    token: Option<String>,
}

impl HttpImageStorage {
    pub fn new(upload_url: Option<Url>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            upload_url,
            token,
        }
    }
}

#[async_trait]
impl ImageStorage for HttpImageStorage {
    async fn upload(&self, image: &ReferenceImage) -> Result<String, UploadError> {
        let base = self.upload_url.as_ref().ok_or(UploadError::NotConfigured)?;
        let target = base
            .join(&format!("reference/{}", image.digest))
            .map_err(|e| UploadError::Request(e.to_string()))?;

        let mut req = self
            .http
            .post(target)
            .header(reqwest::header::CONTENT_TYPE, image.mime.as_str())
            .body(image.bytes.clone());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UploadError::Rejected(resp.status().as_u16()));
        }
        let reply: UploadReply = resp
            .json()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(reply.url)
    }
}
