use std::rc::Rc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notifyall_http_requests_total",
            "Total HTTP requests handled by notification-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create notifyall_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notifyall_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "notifyall_http_request_duration_seconds",
            "HTTP request latency for notification-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]),
        &["method", "path", "status"],
    )
    .expect("failed to create notifyall_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register notifyall_http_request_duration_seconds");
    histogram
});

static NOTIFICATIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notifyall_notifications_created_total",
            "Notifications stored, by audience",
        ),
        &["audience"],
    )
    .expect("failed to create notifyall_notifications_created_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notifyall_notifications_created_total");
    counter
});

static ATTACHMENT_UPLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "notifyall_attachment_uploads_total",
            "Attachment uploads, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create notifyall_attachment_uploads_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register notifyall_attachment_uploads_total");
    counter
});

static LIVE_FEEDS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("notifyall_live_feeds", "Notification feeds currently open")
        .expect("failed to create notifyall_live_feeds");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register notifyall_live_feeds");
    gauge
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn record_notification_created(audience: &str) {
    NOTIFICATIONS_CREATED_TOTAL
        .with_label_values(&[audience])
        .inc();
}

pub fn record_attachment_upload(outcome: &str) {
    ATTACHMENT_UPLOADS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Counts an open feed for as long as it is held.
pub struct LiveFeedGuard(());

impl LiveFeedGuard {
    pub fn open() -> Self {
        LIVE_FEEDS.inc();
        LiveFeedGuard(())
    }
}

impl Drop for LiveFeedGuard {
    fn drop(&mut self) {
        LIVE_FEEDS.dec();
    }
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Records request count and latency, labelled by route pattern so that
/// `/admin/users/{id}` stays one series.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(err) => err.as_response_error().status_code().as_u16(),
            };
            observe_http_request(&method, &path, status, start.elapsed());
            result
        })
    }
}
