use anyhow::{bail, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use crm_core::{config, db, http, logging, metrics, server};
use crm_sync::{
    GoHighLevelConfig, GoHighLevelSource, MemoryRecordStore, PgRecordStore, RecordStore,
    RemoteSource, ResourceType, RoutedSource, StoreError, SyncController, WooCommerceConfig,
    WooCommerceSource,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

mod records;
mod sync;


const SERVICE_NAME: &str = "crm-admin-api";

#[derive(Clone)]
pub struct AppState {
    controller: Arc<SyncController>,
    records: Arc<dyn RecordStore>,
}

impl AppState {
    pub fn new(controller: Arc<SyncController>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            controller,
            records,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "record store request failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct HealthStatus {
    status: String,
}

pub struct AdminApiConfig {
    pub addr: SocketAddr,
    pub database_url: Option<String>,
    pub pool: db::PoolSettings,
    pub woocommerce: WooCommerceConfig,
    /// Set when contacts come from GoHighLevel instead of WooCommerce.
    pub gohighlevel: Option<GoHighLevelConfig>,
    pub http: http::HttpOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactsSource {
    WooCommerce,
    GoHighLevel,
}

fn parse_contacts_source(raw: Option<&str>) -> Result<ContactsSource> {
    match raw.map(str::trim) {
        None | Some("") | Some("woocommerce") => Ok(ContactsSource::WooCommerce),
        Some("gohighlevel") => Ok(ContactsSource::GoHighLevel),
        Some(other) => {
            bail!("CRM_CONTACTS_SOURCE must be `woocommerce` or `gohighlevel`, got `{other}`")
        }
    }
}

pub fn load_config() -> Result<AdminApiConfig> {
    let addr = config::socket_addr_from_env("CRM_API_ADDR", "0.0.0.0:8000")?;
    let database_url = config::optional_env("DATABASE_URL");
    let pool = db::PoolSettings::from_env()?;
    let woocommerce = WooCommerceConfig::from_env()?;
    let gohighlevel =
        match parse_contacts_source(config::optional_env("CRM_CONTACTS_SOURCE").as_deref())? {
            ContactsSource::WooCommerce => None,
            ContactsSource::GoHighLevel => Some(GoHighLevelConfig::from_env()?),
        };
    let cors_origins = config::optional_env("CRM_CORS_ORIGINS")
        .map(|raw| http::parse_origins(&raw))
        .unwrap_or_default();
    Ok(AdminApiConfig {
        addr,
        database_url,
        pool,
        woocommerce,
        gohighlevel,
        http: http::HttpOptions {
            cors_origins,
            ..http::HttpOptions::default()
        },
    })
}

pub async fn run(config: AdminApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let records: Arc<dyn RecordStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = db::connect(database_url, &config.pool).await?;
            Arc::new(PgRecordStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; records are kept in memory only");
            Arc::new(MemoryRecordStore::new())
        }
    };
    let woocommerce: Arc<dyn RemoteSource> =
        Arc::new(WooCommerceSource::new(config.woocommerce)?);
    let source: Arc<dyn RemoteSource> = match config.gohighlevel {
        Some(gohighlevel) => {
            let contacts = Arc::new(GoHighLevelSource::new(gohighlevel)?);
            Arc::new(RoutedSource::new(woocommerce).route(ResourceType::Customers, contacts))
        }
        None => woocommerce,
    };
    let controller = SyncController::with_service_name(source, Arc::clone(&records), SERVICE_NAME);

    let router = router(AppState::new(controller, records));
    let router = http::apply_standard_layers(router, SERVICE_NAME, &config.http);
    server::serve(config.addr, router, server::shutdown_signal()).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/sync/", post(sync::start_sync))
        .route("/sync/status/", get(sync::sync_status))
        .route("/sync/stop/", post(sync::stop_sync))
        .route("/crm/sync/stop/", post(sync::stop_sync))
        .route("/contacts/", get(records::list_contacts))
        .route("/orders/", get(records::list_orders))
        .route("/products/", get(records::list_products))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.ping().await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(err) => {
            tracing::warn!(error = %err, "record store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable".into(),
                }),
            )
        }
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}
