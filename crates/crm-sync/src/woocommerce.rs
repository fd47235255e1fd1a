//! WooCommerce REST (`wc/v3`) implementation of [`RemoteSource`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::job::ResourceType;
use crate::records::{Contact, Order, Product, Record};
use crate::source::{Cursor, RemoteSource, SourceError, SourcePage};

pub(crate) const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Clone)]
pub struct WooCommerceConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl WooCommerceConfig {
    pub fn new(
        base_url: impl Into<String>,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            page_size: 100,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn from_env() -> Result<Self> {
        use crm_core::config::{parse_env, required_env};

        let mut config = Self::new(
            required_env("WOOCOMMERCE_URL")?,
            required_env("WOOCOMMERCE_CONSUMER_KEY")?,
            required_env("WOOCOMMERCE_CONSUMER_SECRET")?,
        );
        config.page_size = parse_env("WOOCOMMERCE_PAGE_SIZE", 100_u32)?.clamp(1, 100);
        config.timeout = Duration::from_secs(parse_env("WOOCOMMERCE_TIMEOUT_SECONDS", 30_u64)?);
        Ok(config)
    }
}

impl fmt::Debug for WooCommerceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WooCommerceConfig")
            .field("base_url", &self.base_url)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

pub struct WooCommerceSource {
    client: Client,
    config: WooCommerceConfig,
}

impl WooCommerceSource {
    pub fn new(config: WooCommerceConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        tracing::info!(base_url = %config.base_url, "woocommerce source configured");
        Ok(Self { client, config })
    }

    fn endpoint_url(&self, resource: ResourceType) -> String {
        format!(
            "{}/wp-json/wc/v3/{}",
            self.config.base_url.trim_end_matches('/'),
            resource.as_str()
        )
    }

    fn query_params(&self, resource: ResourceType, page: Cursor) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("per_page", self.config.page_size.to_string()),
            ("page", page.to_string()),
        ];
        match resource {
            ResourceType::Products => params.push(("status", "publish".to_string())),
            ResourceType::Customers => params.push(("role", "all".to_string())),
            ResourceType::Orders => {}
        }
        params
    }

    /// Transport failures are retried with a linear backoff; any HTTP
    /// response, including 5xx, is handed back to the caller as-is.
    async fn send(
        &self,
        resource: ResourceType,
        page: Cursor,
    ) -> Result<reqwest::Response, SourceError> {
        let url = self.endpoint_url(resource);
        let params = self.query_params(resource, page);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .client
                .get(&url)
                .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
                .query(&params)
                .send()
                .await;
            match result {
                Ok(response) => return Ok(response),
                Err(err) if attempt < max_attempts && (err.is_timeout() || err.is_connect()) => {
                    tracing::warn!(
                        resource = %resource,
                        page,
                        attempt,
                        error = %err,
                        "woocommerce request failed; retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(SourceError::Transport {
                        endpoint: resource.as_str().to_string(),
                        message: err.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl RemoteSource for WooCommerceSource {
    async fn fetch_page(
        &self,
        resource: ResourceType,
        cursor: Option<Cursor>,
    ) -> Result<SourcePage, SourceError> {
        let page = cursor.unwrap_or(1).max(1);
        let endpoint = resource.as_str();
        let response = self.send(resource, page).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let total = header_u64(response.headers(), "x-wp-total");
        let total_pages = header_u64(response.headers(), "x-wp-totalpages");
        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })?;

        let records: Vec<Record> = match resource {
            ResourceType::Products => parse::<WooProduct>(endpoint, &body)?
                .into_iter()
                .map(|item| Record::Product(item.into()))
                .collect(),
            ResourceType::Customers => parse::<WooCustomer>(endpoint, &body)?
                .into_iter()
                .map(|item| Record::Contact(item.into()))
                .collect(),
            ResourceType::Orders => parse::<WooOrder>(endpoint, &body)?
                .into_iter()
                .map(|item| Record::Order(item.into()))
                .collect(),
        };

        // Without pagination headers a full page means there may be more.
        let has_more = match total_pages {
            Some(pages) => u64::from(page) < pages,
            None => records.len() as u64 == u64::from(self.config.page_size),
        };
        let next_cursor = (has_more && !records.is_empty()).then_some(page + 1);

        tracing::debug!(
            resource = %resource,
            page,
            count = records.len(),
            total = ?total,
            total_pages = ?total_pages,
            "fetched woocommerce page"
        );

        Ok(SourcePage {
            total: total.unwrap_or(records.len() as u64),
            records,
            next_cursor,
        })
    }
}

fn parse<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<Vec<T>, SourceError> {
    serde_json::from_slice(body).map_err(|err| SourceError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_gmt(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
struct WooTerm {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct WooImage {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Deserialize)]
struct WooProduct {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    regular_price: Option<String>,
    #[serde(default)]
    sale_price: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    stock_status: Option<String>,
    #[serde(default)]
    stock_quantity: Option<i64>,
    #[serde(default)]
    categories: Vec<WooTerm>,
    #[serde(default)]
    images: Vec<WooImage>,
}

impl From<WooProduct> for Product {
    fn from(item: WooProduct) -> Self {
        Product {
            external_id: item.id.to_string(),
            name: item.name.unwrap_or_default(),
            description: item.description.unwrap_or_default(),
            sku: item.sku.unwrap_or_default(),
            price: non_empty(item.price),
            regular_price: non_empty(item.regular_price),
            sale_price: non_empty(item.sale_price),
            status: item.status.unwrap_or_default(),
            stock_status: item.stock_status.unwrap_or_else(|| "instock".to_string()),
            stock_quantity: item.stock_quantity,
            categories: item.categories.into_iter().filter_map(|c| c.name).collect(),
            images: item.images.into_iter().filter_map(|i| i.src).collect(),
            updated_at: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct WooBilling {
    #[serde(default)]
    address_1: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
struct WooCustomer {
    id: u64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    billing: Option<WooBilling>,
}

impl From<WooCustomer> for Contact {
    fn from(item: WooCustomer) -> Self {
        let billing = item.billing.unwrap_or_default();
        Contact {
            external_id: item.id.to_string(),
            first_name: item.first_name.unwrap_or_default(),
            last_name: item.last_name.unwrap_or_default(),
            email: non_empty(item.email).or_else(|| non_empty(billing.email)),
            phone: non_empty(billing.phone),
            billing_address: billing.address_1.unwrap_or_default(),
            billing_city: billing.city.unwrap_or_default(),
            billing_state: billing.state.unwrap_or_default(),
            billing_postcode: billing.postcode.unwrap_or_default(),
            updated_at: None,
        }
    }
}

#[derive(Deserialize)]
struct WooOrder {
    id: u64,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_id: Option<u64>,
    #[serde(default)]
    billing: Option<WooBilling>,
    #[serde(default)]
    date_created_gmt: Option<String>,
}

impl From<WooOrder> for Order {
    fn from(item: WooOrder) -> Self {
        let billing = item.billing.unwrap_or_default();
        Order {
            external_id: item.id.to_string(),
            order_number: item.number.unwrap_or_else(|| item.id.to_string()),
            status: item.status.unwrap_or_default(),
            total_amount: non_empty(item.total),
            currency: item.currency.unwrap_or_default(),
            // 0 marks a guest checkout.
            customer_external_id: item
                .customer_id
                .filter(|id| *id != 0)
                .map(|id| id.to_string()),
            billing_email: non_empty(billing.email),
            order_date: parse_gmt(item.date_created_gmt.as_deref()),
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> WooCommerceConfig {
        let mut config = WooCommerceConfig::new(server.uri(), "ck_test", "cs_test");
        config.page_size = 2;
        config.retry_delay = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn fetches_first_product_page_with_totals() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wc/v3/products"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .and(query_param("status", "publish"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-WP-Total", "3")
                    .insert_header("X-WP-TotalPages", "2")
                    .set_body_json(json!([
                        {
                            "id": 11,
                            "name": "Vitamin C Serum",
                            "price": "49.00",
                            "regular_price": "59.00",
                            "sale_price": "",
                            "status": "publish",
                            "stock_status": "instock",
                            "stock_quantity": null,
                            "categories": [{ "id": 1, "name": "Skincare" }],
                            "images": [{ "src": "https://cdn.test/serum.png" }]
                        },
                        { "id": 12, "name": "Retinol" }
                    ])),
            )
            .mount(&server)
            .await;

        let source = WooCommerceSource::new(config_for(&server)).unwrap();
        let page = source
            .fetch_page(ResourceType::Products, None)
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.next_cursor, Some(2));
        assert_eq!(page.records.len(), 2);
        match &page.records[0] {
            Record::Product(product) => {
                assert_eq!(product.external_id, "11");
                assert_eq!(product.price.as_deref(), Some("49.00"));
                assert_eq!(product.sale_price, None);
                assert_eq!(product.categories, vec!["Skincare".to_string()]);
                assert_eq!(product.images, vec!["https://cdn.test/serum.png".to_string()]);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_page_has_no_next_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wc/v3/customers"))
            .and(query_param("page", "2"))
            .and(query_param("role", "all"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-WP-Total", "3")
                    .insert_header("X-WP-TotalPages", "2")
                    .set_body_json(json!([
                        {
                            "id": 7,
                            "first_name": "Ada",
                            "last_name": "Lovelace",
                            "email": "ada@example.test",
                            "billing": { "phone": "555-0100", "city": "London", "address_1": null }
                        }
                    ])),
            )
            .mount(&server)
            .await;

        let source = WooCommerceSource::new(config_for(&server)).unwrap();
        let page = source
            .fetch_page(ResourceType::Customers, Some(2))
            .await
            .unwrap();

        assert_eq!(page.next_cursor, None);
        match &page.records[0] {
            Record::Contact(contact) => {
                assert_eq!(contact.external_id, "7");
                assert_eq!(contact.phone.as_deref(), Some("555-0100"));
                assert_eq!(contact.billing_city, "London");
                assert_eq!(contact.billing_address, "");
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_guest_orders_and_gmt_dates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wc/v3/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 900,
                    "number": "900",
                    "status": "processing",
                    "total": "120.50",
                    "currency": "USD",
                    "customer_id": 0,
                    "billing": { "email": "guest@example.test" },
                    "date_created_gmt": "2024-05-02T09:30:00"
                }
            ])))
            .mount(&server)
            .await;

        let source = WooCommerceSource::new(config_for(&server)).unwrap();
        let page = source.fetch_page(ResourceType::Orders, None).await.unwrap();

        // No pagination headers and a short page: nothing more to fetch.
        assert_eq!(page.total, 1);
        assert_eq!(page.next_cursor, None);
        match &page.records[0] {
            Record::Order(order) => {
                assert_eq!(order.customer_external_id, None);
                assert_eq!(order.billing_email.as_deref(), Some("guest@example.test"));
                assert_eq!(order.total_amount.as_deref(), Some("120.50"));
                assert_eq!(
                    order.order_date,
                    Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap())
                );
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wc/v3/customers"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
            .expect(1)
            .mount(&server)
            .await;

        let source = WooCommerceSource::new(config_for(&server)).unwrap();
        let err = source
            .fetch_page(ResourceType::Customers, Some(2))
            .await
            .unwrap_err();

        match err {
            SourceError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "database unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wc/v3/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "oops" })))
            .mount(&server)
            .await;

        let source = WooCommerceSource::new(config_for(&server)).unwrap();
        let err = source
            .fetch_page(ResourceType::Products, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error_after_retries() {
        let mut config = WooCommerceConfig::new("http://127.0.0.1:9", "ck", "cs");
        config.max_attempts = 2;
        config.retry_delay = Duration::from_millis(1);
        config.timeout = Duration::from_secs(2);

        let source = WooCommerceSource::new(config).unwrap();
        let err = source
            .fetch_page(ResourceType::Products, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Transport { .. }));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = WooCommerceConfig::new("https://shop.test", "ck_visible", "cs_hidden");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("ck_visible"));
        assert!(!rendered.contains("cs_hidden"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
