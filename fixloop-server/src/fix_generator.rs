use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

use crate::ports::{FileFix, FixGenerator, FixRequest};

/// Client for the external fix-generation service.
#[derive(Clone)]
pub struct HttpFixGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateFixesResponse {
    /// Absent and `null` both mean no changes.
    #[serde(default)]
    fixes: Option<Vec<FileFix>>,
}

impl GenerateFixesResponse {
    fn into_fixes(self) -> Vec<FileFix> {
        self.fixes.unwrap_or_default()
    }
}

impl HttpFixGenerator {
    /// `timeout` bounds each request; the orchestrator applies its own
    /// deadline on top.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("fixloop/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create fix generator HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/generate-fixes", self.base_url)
    }
}

#[async_trait]
impl FixGenerator for HttpFixGenerator {
    async fn generate_fixes(&self, request: &FixRequest) -> Result<Vec<FileFix>> {
        info!(
            "Requesting fixes for {} issues on branch {}",
            request.issues.len(),
            request.branch
        );

        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = builder
            .send()
            .await
            .context("Failed to send fix generation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Fix generation API error: {} - {}", status, error_text);
            return Err(anyhow!(
                "Fix generation API error: {} - {}",
                status,
                error_text
            ));
        }

        let body: GenerateFixesResponse = response
            .json()
            .await
            .context("Failed to parse fix generation response")?;

        let fixes = body.into_fixes();
        info!("Fix generator returned {} file changes", fixes.len());
        Ok(fixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let generator =
            HttpFixGenerator::new("https://fixes.example.com/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            generator.endpoint(),
            "https://fixes.example.com/generate-fixes"
        );
    }

    #[test]
    fn test_missing_or_null_fixes_mean_empty() {
        let body: GenerateFixesResponse = serde_json::from_str("{}").unwrap();
        assert!(body.into_fixes().is_empty());

        let body: GenerateFixesResponse = serde_json::from_str(r#"{"fixes": null}"#).unwrap();
        assert!(body.into_fixes().is_empty());

        let body: GenerateFixesResponse = serde_json::from_str(
            r#"{"fixes": [{"path": "src/lib.rs", "content": "pub fn f() {}\n"}]}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_fixes(),
            vec![FileFix {
                path: "src/lib.rs".to_string(),
                content: "pub fn f() {}\n".to_string(),
            }]
        );
    }
}
