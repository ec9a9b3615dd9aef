use anyhow::Result;
use axum_prometheus::PrometheusMetricLayer;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use prometheus::{Counter, Histogram, Registry, Gauge};
use std::sync::Arc;
use tracing::{info, warn, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::Config;

/// Metrics collector for the graph-authoritative API.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub events_appended_total: Counter,
    pub status_transitions_total: Counter,
    pub task_claims_total: Counter,
    pub task_claims_contested_total: Counter,
    pub sse_connections_active: Gauge,
    pub api_requests_total: Counter,
    pub api_request_duration: Histogram,
    pub billing_webhooks_total: Counter,
    pub team_membership_changes_total: Counter,
    pub auth_operations_total: Counter,
    pub errors_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_appended_total = Counter::new(
            "ginko_events_appended_total",
            "Total number of events appended to the graph-native event log"
        )?;

        let status_transitions_total = Counter::new(
            "ginko_status_transitions_total",
            "Total number of task/epic/sprint status transitions"
        )?;

        let task_claims_total = Counter::new(
            "ginko_task_claims_total",
            "Total number of successful task claims"
        )?;

        let task_claims_contested_total = Counter::new(
            "ginko_task_claims_contested_total",
            "Total number of task claim attempts that lost the race to an existing claim"
        )?;

        let sse_connections_active = Gauge::new(
            "ginko_sse_connections_active",
            "Number of active SSE event stream connections"
        )?;

        let api_requests_total = Counter::new(
            "ginko_api_requests_total",
            "Total number of API requests"
        )?;

        let api_request_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "ginko_api_request_duration_seconds",
                "API request duration in seconds"
            )
        )?;

        let billing_webhooks_total = Counter::new(
            "ginko_billing_webhooks_total",
            "Total number of payment-provider webhook events dispatched"
        )?;

        let team_membership_changes_total = Counter::new(
            "ginko_team_membership_changes_total",
            "Total number of team membership changes (joins, removals)"
        )?;

        let auth_operations_total = Counter::new(
            "ginko_auth_operations_total",
            "Total number of authentication operations"
        )?;

        let errors_total = Counter::new(
            "ginko_errors_total",
            "Total number of errors by type"
        )?;

        registry.register(Box::new(events_appended_total.clone()))?;
        registry.register(Box::new(status_transitions_total.clone()))?;
        registry.register(Box::new(task_claims_total.clone()))?;
        registry.register(Box::new(task_claims_contested_total.clone()))?;
        registry.register(Box::new(sse_connections_active.clone()))?;
        registry.register(Box::new(api_requests_total.clone()))?;
        registry.register(Box::new(api_request_duration.clone()))?;
        registry.register(Box::new(billing_webhooks_total.clone()))?;
        registry.register(Box::new(team_membership_changes_total.clone()))?;
        registry.register(Box::new(auth_operations_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            registry,
            events_appended_total,
            status_transitions_total,
            task_claims_total,
            task_claims_contested_total,
            sse_connections_active,
            api_requests_total,
            api_request_duration,
            billing_webhooks_total,
            team_membership_changes_total,
            auth_operations_total,
            errors_total,
        })
    }

    /// Get the Prometheus metrics layer for Axum
    pub fn prometheus_layer(&self) -> PrometheusMetricLayer<'static> {
        PrometheusMetricLayer::new()
    }

    /// Record an event append onto the graph-native log.
    pub fn record_event_appended(&self, graph_id: &str, category: &str) {
        self.events_appended_total.inc();
        tracing::debug!(graph_id = graph_id, category = category, "event appended");
    }

    /// Record a task/epic/sprint status transition.
    pub fn record_status_transition(&self, entity_label: &str, new_status: &str) {
        self.status_transitions_total.inc();
        tracing::info!(entity_label = entity_label, new_status = new_status, "status transition");
    }

    /// Record a task claim attempt's outcome.
    pub fn record_task_claim(&self, contested: bool) {
        if contested {
            self.task_claims_contested_total.inc();
        } else {
            self.task_claims_total.inc();
        }
    }

    /// Record SSE connection change
    pub fn record_sse_connection_change(&self, delta: i64) {
        if delta > 0 {
            self.sse_connections_active.add(delta as f64);
        } else {
            self.sse_connections_active.sub((-delta) as f64);
        }
    }

    /// Record API request
    pub fn record_api_request(&self, method: &str, path: &str, duration_seconds: f64) {
        self.api_requests_total.inc();
        self.api_request_duration.observe(duration_seconds);
        tracing::debug!(
            method = method,
            path = path,
            duration_seconds = duration_seconds,
            "API request completed"
        );
    }

    /// Record a dispatched payment-provider webhook event.
    pub fn record_billing_webhook(&self, event_type: &str) {
        self.billing_webhooks_total.inc();
        tracing::info!(event_type = event_type, "billing webhook dispatched");
    }

    /// Record a team membership change.
    pub fn record_team_membership_change(&self, operation: &str) {
        self.team_membership_changes_total.inc();
        tracing::info!(operation = operation, "team membership changed");
    }

    /// Record authentication operation
    pub fn record_auth_operation(&self, operation: &str, success: bool) {
        self.auth_operations_total.inc();
        tracing::info!(
            operation = operation,
            success = success,
            "Authentication operation completed"
        );
    }

    /// Record error
    pub fn record_error(&self, error_type: &str, context: &str) {
        self.errors_total.inc();
        tracing::error!(
            error_type = error_type,
            context = context,
            "Error occurred"
        );
    }
}

/// Add correlation ID to the current span
pub fn add_correlation_id() -> String {
    let correlation_id = Uuid::new_v4().to_string();
    Span::current().record("correlation_id", &correlation_id);
    correlation_id
}

/// Initialize comprehensive observability including tracing, metrics, and structured logging
pub async fn init_observability(config: &Config) -> Result<Metrics> {
    // Initialize metrics first
    let metrics = Metrics::new()?;
    
    // Create a resource that identifies this service
    let resource = Resource::new(vec![
        opentelemetry::KeyValue::new("service.name", config.observability.service_name.clone()),
        opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    // Set up the tracing subscriber with multiple layers
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    // Add OpenTelemetry tracing if endpoint is configured
    if let Some(endpoint) = &config.observability.tracing_endpoint {
        info!(
            "Initializing OpenTelemetry tracing with endpoint: {}",
            endpoint
        );

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(opentelemetry_sdk::trace::config().with_resource(resource))
            .install_batch(runtime::Tokio)?;

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        subscriber.with(telemetry_layer).try_init()?;
    } else {
        warn!("OpenTelemetry endpoint not configured, using local logging only");
        subscriber.try_init()?;
    }

    info!("Comprehensive observability initialized successfully");
    Ok(metrics)
}

pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
