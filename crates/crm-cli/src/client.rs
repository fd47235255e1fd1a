use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use crm_sync::{ResourceType, SyncJob};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::poller::StatusSource;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartResponse {
    Started(SyncJob),
    /// Another run was active; carries its snapshot.
    AlreadyRunning(SyncJob),
}

/// Talks to the sync endpoints of the admin API.
pub struct HttpSyncClient {
    client: Client,
    base_url: String,
}

impl HttpSyncClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn start(&self, resource: Option<ResourceType>) -> Result<StartResponse> {
        let body = match resource {
            Some(resource) => json!({ "type": resource.as_str() }),
            None => json!({}),
        };
        let response = self
            .client
            .post(self.url("/sync/"))
            .json(&body)
            .send()
            .await
            .context("failed to reach sync API")?;

        if response.status() == StatusCode::CONFLICT {
            let error: ErrorBody = response.json().await.context("invalid conflict body")?;
            let current = error
                .details
                .ok_or_else(|| anyhow!("{}: {}", error.code, error.message))?;
            let current: SyncJob =
                serde_json::from_value(current).context("invalid sync snapshot")?;
            return Ok(StartResponse::AlreadyRunning(current));
        }
        Ok(StartResponse::Started(read_job(response).await?))
    }

    pub async fn status(&self) -> Result<SyncJob> {
        let response = self
            .client
            .get(self.url("/sync/status/"))
            .send()
            .await
            .context("failed to reach sync API")?;
        read_job(response).await
    }

    pub async fn stop(&self) -> Result<SyncJob> {
        let response = self
            .client
            .post(self.url("/sync/stop/"))
            .send()
            .await
            .context("failed to reach sync API")?;
        read_job(response).await
    }
}

#[async_trait]
impl StatusSource for HttpSyncClient {
    async fn fetch_status(&self) -> Result<SyncJob> {
        self.status().await
    }
}

async fn read_job(response: Response) -> Result<SyncJob> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("invalid sync snapshot");
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(error) => Err(anyhow!("{} ({}): {}", error.code, status, error.message)),
        Err(_) => Err(anyhow!("sync API returned {status}: {text}")),
    }
}
