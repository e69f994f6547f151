//! OpenAI-compatible embeddings client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingProvider;
use crate::{Error, Result};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_vector(self) -> Result<Vec<f32>> {
        self.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::EmbeddingUnavailable("Empty embedding response".to_string()))
    }
}

/// Embeddings from an OpenAI-compatible `/v1/embeddings` endpoint
/// (OpenAI, Ollama, vLLM and similar).
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbeddings {
    /// Creates a client for the server at `url` using `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/v1/embeddings", self.url.trim_end_matches('/'));
        debug!("Requesting embedding from {}", endpoint);

        let mut request = self.client.post(&endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::EmbeddingUnavailable(format!(
                "Embedding request failed: {}",
                resp.status()
            )));
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            Error::EmbeddingUnavailable(format!("Failed to parse embedding response: {e}"))
        })?;
        parsed.into_vector()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.1,0.2]}],"model":"m"}"#).unwrap();
        assert_eq!(parsed.into_vector().unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_empty_response_is_unavailable() {
        let parsed: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(
            parsed.into_vector(),
            Err(Error::EmbeddingUnavailable(_))
        ));
    }
}
