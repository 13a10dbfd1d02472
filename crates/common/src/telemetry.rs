use crate::Environment;
use crate::config::env_or;
use crate::logging::install_subscriber;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Environment variable holding the OTLP collector endpoint.
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Export knobs read next to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSettings {
    /// Fraction of root traces kept; children follow their parent.
    pub trace_ratio: f64,
    pub metrics_interval: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            trace_ratio: 1.0,
            metrics_interval: Duration::from_secs(10),
        }
    }
}

impl ExportSettings {
    /// `STENTOR_TRACE_RATIO` (0..=1) and `STENTOR_METRICS_INTERVAL_S`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let trace_ratio: f64 = env_or("STENTOR_TRACE_RATIO", defaults.trace_ratio);
        let interval_s: u64 = env_or("STENTOR_METRICS_INTERVAL_S", 10);
        Self {
            trace_ratio: if trace_ratio.is_finite() {
                trace_ratio.clamp(0.0, 1.0)
            } else {
                defaults.trace_ratio
            },
            metrics_interval: Duration::from_secs(interval_s.max(1)),
        }
    }

    fn sampler(&self) -> Sampler {
        let root = if self.trace_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::TraceIdRatioBased(self.trace_ratio)
        };
        Sampler::ParentBased(Box::new(root))
    }
}

/// Owns the tracer and meter providers; flushes and shuts them down on drop.
///
/// The OTLP exporters are tonic based, so `init` must run inside a Tokio
/// runtime context (`Runtime::enter`) that outlives the guard.
///
/// # Example
/// ```ignore
/// let runtime = tokio::runtime::Runtime::new()?;
/// let _rt = runtime.enter();
/// let _telemetry = TelemetryGuard::init("stentor-worker", "http://localhost:4317", Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// OTLP span and metric export plus the tracing subscriber, with
    /// settings from the environment.
    ///
    /// Replaces [`crate::setup_logging`]; call one or the other.
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        Self::init_with(service_name, endpoint, environment, ExportSettings::from_env())
    }

    pub fn init_with(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
        settings: ExportSettings,
    ) -> anyhow::Result<Self> {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let resource = service_resource(service_name, environment);

        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_sampler(settings.sampler())
            .with_batch_exporter(
                opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .build()?,
            )
            .build();
        global::set_tracer_provider(tracer_provider.clone());

        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(
                PeriodicReader::builder(metrics)
                    .with_interval(settings.metrics_interval)
                    .build(),
            )
            .build();
        global::set_meter_provider(meter_provider.clone());

        let otel = tracing_opentelemetry::layer().with_tracer(global::tracer(service_name.to_string()));
        install_subscriber(environment, otel)?;

        tracing::info!(
            service = service_name,
            endpoint,
            trace_ratio = settings.trace_ratio,
            "Telemetry export enabled"
        );
        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
    }
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
}
