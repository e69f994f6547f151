//! Clients for the web mail gateway's JSON API.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Enhancer, MailProvider};
use crate::enhance::EnhanceMode;
use crate::model::{ChangeSet, Draft, EmailId, FlagUpdate, MailboxId, SentReceipt, SyncCursor};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("HTTP client error: {e}")))
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Maps a non-success status of the changes endpoint to an error.
fn sync_status_error(status: StatusCode, body: String) -> Error {
    match status {
        StatusCode::CONFLICT | StatusCode::GONE => Error::InvalidCursor(body),
        _ => Error::ProviderUnavailable(format!("{status}: {body}")),
    }
}

/// Maps a non-success status of the send endpoint to an error.
fn send_status_error(status: StatusCode, body: String) -> Error {
    if status.is_client_error() {
        Error::SendRejected(body)
    } else {
        Error::ProviderUnavailable(format!("{status}: {body}"))
    }
}

/// Mail provider reached through the gateway's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpMailProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMailProvider {
    /// Creates a client for the gateway at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl MailProvider for HttpMailProvider {
    async fn fetch_changes(
        &self,
        mailbox: &MailboxId,
        cursor: Option<&SyncCursor>,
    ) -> Result<ChangeSet> {
        let endpoint = join_url(&self.base_url, "api/inbox/changes");
        let mut query = vec![("mailbox", mailbox.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.as_str()));
        }
        debug!("Fetching changes from {} (cursor: {:?})", endpoint, cursor);

        let resp = self
            .authorize(self.client.get(&endpoint).query(&query))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(sync_status_error(status, body));
        }

        resp.json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Failed to parse changes: {e}")))
    }

    async fn send_message(&self, draft: &Draft) -> Result<SentReceipt> {
        let endpoint = join_url(&self.base_url, "api/inbox/send");

        let resp = self
            .authorize(self.client.post(&endpoint).json(draft))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(send_status_error(status, body));
        }

        resp.json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("Failed to parse send receipt: {e}")))
    }

    async fn update_flags(&self, id: &EmailId, flags: FlagUpdate) -> Result<()> {
        let endpoint = join_url(&self.base_url, &format!("api/inbox/emails/{id}/flags"));

        let resp = self
            .authorize(self.client.patch(&endpoint).json(&flags))
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id.clone()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ProviderUnavailable(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct EnhanceRequest<'a> {
    content: &'a str,
    action: EnhanceMode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhanceResponse {
    #[serde(default)]
    success: bool,
    enhanced_content: Option<String>,
    error: Option<String>,
}

impl EnhanceResponse {
    fn into_result(self) -> Result<String> {
        match self.enhanced_content {
            Some(text) if self.success && !text.is_empty() => Ok(text),
            _ => Err(Error::EnhancementUnavailable(
                self.error
                    .unwrap_or_else(|| "Failed to enhance content".to_string()),
            )),
        }
    }
}

/// AI rewriting through the gateway's enhance endpoint.
#[derive(Debug, Clone)]
pub struct HttpEnhancer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnhancer {
    /// Creates a client for the gateway at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }
}

impl Enhancer for HttpEnhancer {
    async fn rewrite(&self, text: &str, mode: EnhanceMode) -> Result<String> {
        let endpoint = join_url(&self.base_url, "api/inbox/enhance");
        let body = EnhanceRequest {
            content: text,
            action: mode,
        };

        let resp = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EnhancementUnavailable(format!("Enhancement request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::EnhancementUnavailable(format!(
                "Enhancement request failed: {}",
                resp.status()
            )));
        }

        let parsed: EnhanceResponse = resp.json().await.map_err(|e| {
            Error::EnhancementUnavailable(format!("Failed to parse enhancement response: {e}"))
        })?;
        parsed.into_result()
    }
}
