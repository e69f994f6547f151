//! Upstash Vector REST client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::VectorIndex;
use crate::model::{EmailId, Neighbor};
use crate::{Error, Result};

#[derive(Serialize)]
struct UpsertRequest<'a> {
    id: &'a str,
    vector: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
}

impl QueryResponse {
    fn into_neighbors(self) -> Vec<Neighbor> {
        self.result
            .into_iter()
            .map(|m| Neighbor {
                id: EmailId::new(m.id),
                score: m.score,
            })
            .collect()
    }
}

/// Vector index backed by an Upstash Vector database.
#[derive(Debug, Clone)]
pub struct UpstashVectorIndex {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashVectorIndex {
    /// Creates a client from the database's REST URL and token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.url.trim_end_matches('/'))
    }
}

impl VectorIndex for UpstashVectorIndex {
    async fn upsert(&self, id: &EmailId, vector: Vec<f32>) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint("upsert"))
            .bearer_auth(&self.token)
            .json(&UpsertRequest {
                id: id.as_str(),
                vector,
            })
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Vector upsert failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::EmbeddingUnavailable(format!(
                "Vector upsert failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let resp = self
            .client
            .post(self.endpoint("query"))
            .bearer_auth(&self.token)
            .json(&QueryRequest { vector, top_k: k })
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Vector query failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::EmbeddingUnavailable(format!(
                "Vector query failed: {}",
                resp.status()
            )));
        }

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Failed to parse query: {e}")))?;
        Ok(parsed.into_neighbors())
    }
}
