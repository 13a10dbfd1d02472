use bridge::IpcNames;
use common::{TelemetryGuard, setup_logging};
use std::process::ExitCode;
use worker::{TrackingWorker, WorkerConfig, WorkerIpc, service::report_fatal};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("stentor-worker: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let names = IpcNames::for_session(config.session);

    let _telemetry = match config.otel_endpoint.as_ref() {
        Some(endpoint) => {
            match TelemetryGuard::init("stentor-worker", endpoint, config.environment) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    setup_logging(config.environment);
                    tracing::warn!(error = %e, "Telemetry unavailable, logging locally");
                    None
                }
            }
        }
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(config = ?config, "Loaded configuration");

    let ipc = match WorkerIpc::wait_attach(&names, config.poll_interval, config.attach_timeout) {
        Ok(ipc) => ipc,
        Err(e) => {
            tracing::error!(error = %e, "Failed to attach to pipeline");
            report_fatal(&names, &e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let exit = TrackingWorker::new(ipc, &config).run();
    tracing::info!(reason = ?exit.reason, handled = exit.stats.handled(), "Exiting");
    ExitCode::SUCCESS
}
