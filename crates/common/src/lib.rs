pub mod config;
pub mod logging;
pub mod retry;
pub mod telemetry;
pub mod wait;

pub use config::Environment;
pub use logging::setup_logging;
pub use telemetry::{ExportSettings, TelemetryGuard};
pub use wait::{WaitTimeout, wait_for_resource};
