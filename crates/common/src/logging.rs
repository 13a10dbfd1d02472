use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::Layered, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Install the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG` (default `info`). Development gets pretty,
/// colored output; production gets one JSON object per line so the worker and
/// the main process can be collected by the same log shipper.
///
/// The OpenTelemetry layer is a no-op until a tracer provider is installed
/// (see [`crate::TelemetryGuard`]).
///
/// Safe to call more than once: later calls keep the first subscriber.
pub fn setup_logging(environment: Environment) {
    if install_subscriber(environment, tracing_opentelemetry::layer()).is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Filter, `otel` and the environment's formatter, installed globally.
pub(crate) fn install_subscriber<L>(environment: Environment, otel: L) -> Result<(), TryInitError>
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(env_filter).with(otel);

    match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_thread_names(true),
            )
            .try_init(),
    }
}
