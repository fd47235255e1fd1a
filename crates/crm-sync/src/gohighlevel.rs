//! GoHighLevel contacts (`POST /contacts/search`) implementation of
//! [`RemoteSource`]. Only the customers resource is served.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::job::ResourceType;
use crate::records::{Contact, Record};
use crate::source::{Cursor, RemoteSource, SourceError, SourcePage};
use crate::woocommerce::{non_empty, truncate, MAX_ERROR_BODY_CHARS};

const ENDPOINT: &str = "contacts/search";
pub const DEFAULT_API_URL: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_API_VERSION: &str = "2021-07-28";

#[derive(Clone)]
pub struct GoHighLevelConfig {
    pub base_url: String,
    pub access_token: String,
    pub location_id: String,
    /// Sent as the `Version` header on every request.
    pub api_version: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl GoHighLevelConfig {
    pub fn new(access_token: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            access_token: access_token.into(),
            location_id: location_id.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            page_size: 100,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn from_env() -> Result<Self> {
        use crm_core::config::{optional_env, parse_env, required_env};

        let mut config = Self::new(
            required_env("GHL_ACCESS_TOKEN")?,
            required_env("GHL_LOCATION_ID")?,
        );
        if let Some(base_url) = optional_env("GHL_API_URL") {
            config.base_url = base_url;
        }
        if let Some(api_version) = optional_env("GHL_API_VERSION") {
            config.api_version = api_version;
        }
        config.page_size = parse_env("GHL_PAGE_SIZE", 100_u32)?.clamp(1, 100);
        config.timeout = Duration::from_secs(parse_env("GHL_TIMEOUT_SECONDS", 30_u64)?);
        Ok(config)
    }
}

impl fmt::Debug for GoHighLevelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoHighLevelConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("location_id", &self.location_id)
            .field("api_version", &self.api_version)
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    location_id: &'a str,
    page: Cursor,
    page_limit: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    contacts: Vec<GhlContact>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhlContact {
    id: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address1: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
}

impl From<GhlContact> for Contact {
    fn from(item: GhlContact) -> Self {
        Contact {
            external_id: item.id,
            first_name: item.first_name.unwrap_or_default(),
            last_name: item.last_name.unwrap_or_default(),
            email: non_empty(item.email),
            phone: non_empty(item.phone),
            billing_address: item.address1.unwrap_or_default(),
            billing_city: item.city.unwrap_or_default(),
            billing_state: item.state.unwrap_or_default(),
            billing_postcode: item.postal_code.unwrap_or_default(),
            updated_at: None,
        }
    }
}

pub struct GoHighLevelSource {
    client: Client,
    config: GoHighLevelConfig,
}

impl GoHighLevelSource {
    pub fn new(config: GoHighLevelConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        tracing::info!(
            base_url = %config.base_url,
            location_id = %config.location_id,
            "gohighlevel source configured"
        );
        Ok(Self { client, config })
    }

    fn search_url(&self) -> String {
        format!("{}/{ENDPOINT}", self.config.base_url.trim_end_matches('/'))
    }

    /// Same retry policy as the WooCommerce source: transport failures only.
    async fn send(&self, page: Cursor) -> Result<reqwest::Response, SourceError> {
        let url = self.search_url();
        let body = SearchRequest {
            location_id: &self.config.location_id,
            page,
            page_limit: self.config.page_size,
        };
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.config.access_token)
                .header("Version", &self.config.api_version)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) if attempt < max_attempts && (err.is_timeout() || err.is_connect()) => {
                    tracing::warn!(
                        page,
                        attempt,
                        error = %err,
                        "gohighlevel request failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(SourceError::Transport {
                        endpoint: ENDPOINT.to_string(),
                        message: err.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl RemoteSource for GoHighLevelSource {
    async fn fetch_page(
        &self,
        resource: ResourceType,
        cursor: Option<Cursor>,
    ) -> Result<SourcePage, SourceError> {
        if resource != ResourceType::Customers {
            return Err(SourceError::Unsupported {
                source_name: "gohighlevel",
                resource,
            });
        }

        let page = cursor.unwrap_or(1).max(1);
        let response = self.send(page).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                endpoint: ENDPOINT.to_string(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Transport {
                endpoint: ENDPOINT.to_string(),
                message: err.to_string(),
            })?;
        let parsed: SearchResponse =
            serde_json::from_slice(&body).map_err(|err| SourceError::InvalidResponse {
                endpoint: ENDPOINT.to_string(),
                message: err.to_string(),
            })?;

        let records: Vec<Record> = parsed
            .contacts
            .into_iter()
            .map(|item| Record::Contact(item.into()))
            .collect();
        let fetched = u64::from(page) * u64::from(self.config.page_size);
        let has_more = match parsed.total {
            Some(total) => fetched < total,
            None => records.len() as u64 == u64::from(self.config.page_size),
        };
        let next_cursor = (has_more && !records.is_empty()).then_some(page + 1);

        tracing::debug!(
            page,
            count = records.len(),
            total = ?parsed.total,
            "fetched gohighlevel contacts page"
        );

        Ok(SourcePage {
            total: parsed.total.unwrap_or(records.len() as u64),
            records,
            next_cursor,
        })
    }
}
