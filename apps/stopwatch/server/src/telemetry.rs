//! Process-wide observability: `tracing` logs, optional OpenTelemetry spans
//! on stdout, and the Prometheus recorder rendered by `/metrics`.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_sdk::{
    resource::Resource,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const OTEL_STDOUT_ENV: &str = "STOPWATCH_OTEL_STDOUT";
const SERVICE_NAME: &str = "stopwatch-server";
const DEFAULT_FILTER: &str = "info";

/// Keeps the metrics handle and, when span export is on, the tracer provider
/// that is flushed on drop.
pub struct Telemetry {
    metrics: PrometheusHandle,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Span export follows `STOPWATCH_OTEL_STDOUT`.
    pub fn init() -> Result<Self> {
        Self::init_with(env_truthy(OTEL_STDOUT_ENV))
    }

    pub fn init_with(export_spans: bool) -> Result<Self> {
        let metrics = install_metrics()?;

        let tracer_provider = export_spans.then(stdout_tracer_provider);
        let otel_layer = tracer_provider.as_ref().map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
        });
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(false))
            .with(otel_layer)
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        if let Some(provider) = &tracer_provider {
            global::set_tracer_provider(provider.clone());
            info!(env = OTEL_STDOUT_ENV, "exporting spans to stdout");
        }

        Ok(Self {
            metrics,
            tracer_provider,
        })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let Some(provider) = self.tracer_provider.take() else {
            return;
        };
        if let Err(err) = provider.shutdown() {
            warn!(error = %err, "tracer provider did not shut down cleanly");
        }
    }
}

fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_gauge!("stopwatch_connections_active", "Viewer connections currently open");
    describe_counter!("stopwatch_connections_total", "Viewer connections accepted");
    describe_counter!("stopwatch_commands_total", "Commands applied, by command");
    describe_counter!("stopwatch_broadcasts_total", "State changes fanned out, by event");
    describe_counter!("stopwatch_frames_malformed_total", "Inbound frames that failed to parse");
    describe_counter!("stopwatch_frames_ignored_total", "Inbound frames with an unknown type");
    describe_counter!(
        "stopwatch_connections_evicted_total",
        "Connections dropped because their writer had gone away"
    );
}

fn stdout_tracer_provider() -> SdkTracerProvider {
    let resource = Resource::builder()
        .with_attributes([KeyValue::new("service.name", SERVICE_NAME)])
        .build();
    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key).is_ok_and(|value| is_truthy(&value))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
