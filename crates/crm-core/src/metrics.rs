use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

pub const SYNC_OUTCOME_SUCCESS: &str = "success";
pub const SYNC_OUTCOME_ERROR: &str = "error";
pub const SYNC_OUTCOME_STOPPED: &str = "stopped";

struct Metrics {
    registry: Registry,
    crm_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    sync_runs_total: IntCounterVec,
    sync_records_total: IntCounterVec,
    sync_in_progress: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let crm_up = IntGaugeVec::new(Opts::new("crm_up", "Service health"), &["service"])
            .expect("crm_up metric");

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP request count"),
            &["service", "route", "method", "status"],
        )
        .expect("http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["service", "route", "method", "status"],
        )
        .expect("http_request_duration_seconds metric");

        let sync_runs_total = IntCounterVec::new(
            Opts::new("sync_runs_total", "Finished sync runs by scope and outcome"),
            &["service", "scope", "outcome"],
        )
        .expect("sync_runs_total metric");

        let sync_records_total = IntCounterVec::new(
            Opts::new("sync_records_total", "Records upserted by sync runs"),
            &["service", "resource"],
        )
        .expect("sync_records_total metric");

        let sync_in_progress = IntGaugeVec::new(
            Opts::new("sync_in_progress", "1 while a sync run is active"),
            &["service"],
        )
        .expect("sync_in_progress metric");

        registry
            .register(Box::new(crm_up.clone()))
            .expect("register crm_up");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry
            .register(Box::new(sync_runs_total.clone()))
            .expect("register sync_runs_total");
        registry
            .register(Box::new(sync_records_total.clone()))
            .expect("register sync_records_total");
        registry
            .register(Box::new(sync_in_progress.clone()))
            .expect("register sync_in_progress");

        Metrics {
            registry,
            crm_up,
            http_requests_total,
            http_request_duration_seconds,
            sync_runs_total,
            sync_records_total,
            sync_in_progress,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics().crm_up.with_label_values(&[service_name]).set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_sync_run(service_name: &'static str, scope: &str, outcome: &str) {
    metrics()
        .sync_runs_total
        .with_label_values(&[service_name, scope, outcome])
        .inc();
}

pub fn add_sync_records(service_name: &'static str, resource: &str, count: u64) {
    if count == 0 {
        return;
    }
    metrics()
        .sync_records_total
        .with_label_values(&[service_name, resource])
        .inc_by(count);
}

pub fn set_sync_in_progress(service_name: &'static str, active: bool) {
    metrics()
        .sync_in_progress
        .with_label_values(&[service_name])
        .set(i64::from(active));
}

pub fn sync_in_progress(service_name: &'static str) -> bool {
    metrics()
        .sync_in_progress
        .with_label_values(&[service_name])
        .get()
        > 0
}

pub fn metrics_response(service_name: &'static str) -> impl IntoResponse {
    init(service_name);
    let metric_families = metrics().registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}

#[derive(Clone)]
pub struct MetricsLayer {
    service_name: &'static str,
}

impl MetricsLayer {
    pub fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service_name: &'static str,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service_name: self.service_name,
        }
    }
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = axum::response::Response<ResBody>>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = axum::response::Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let service_name = self.service_name;
        let method = request.method().to_string();
        let route = request.uri().path().to_string();
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            let result = fut.await;
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(_) => 500,
            };
            record_http_request(service_name, &method, &route, status, start.elapsed());
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_response_sets_content_type() {
        let response = metrics_response("crm-test").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }

    #[tokio::test]
    async fn sync_counters_show_up_in_exposition() {
        inc_sync_run("crm-test", "all", SYNC_OUTCOME_SUCCESS);
        add_sync_records("crm-test", "products", 3);

        let response = metrics_response("crm-test").into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("sync_runs_total"));
        assert!(text.contains("sync_records_total"));
    }

    #[test]
    fn sync_in_progress_reads_back_the_gauge() {
        assert!(!sync_in_progress("crm-gauge-test"));
        set_sync_in_progress("crm-gauge-test", true);
        assert!(sync_in_progress("crm-gauge-test"));
        set_sync_in_progress("crm-gauge-test", false);
        assert!(!sync_in_progress("crm-gauge-test"));
    }
}
