//! OCR passthrough client.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR endpoint is not configured")]
    NotConfigured,

    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Extract the named fields from the image at `image_url`. The provider's
    /// JSON response is returned as-is.
    async fn extract(&self, image_url: &str, item_names: &[String]) -> Result<Value, OcrError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExtractRequest<'a> {
    image_url: &'a str,
    item_names: &'a [String],
}

/// Posts extraction requests as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn extract(&self, image_url: &str, item_names: &[String]) -> Result<Value, OcrError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractRequest {
                image_url,
                item_names,
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

/// Stand-in used when no OCR endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredOcr;

#[async_trait]
impl OcrClient for UnconfiguredOcr {
    async fn extract(&self, _image_url: &str, _item_names: &[String]) -> Result<Value, OcrError> {
        Err(OcrError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_provider_field_names() {
        let items = vec!["Ingredients".to_string()];
        let json = serde_json::to_value(ExtractRequest {
            image_url: "https://img.example.com/a.jpg",
            item_names: &items,
        })
        .unwrap();
        assert_eq!(json["ImageUrl"], "https://img.example.com/a.jpg");
        assert_eq!(json["ItemNames"][0], "Ingredients");
    }

    #[tokio::test]
    async fn unconfigured_client_fails() {
        let result = UnconfiguredOcr.extract("https://img.example.com/a.jpg", &[]).await;
        assert!(matches!(result, Err(OcrError::NotConfigured)));
    }
}
