use bridge::paths::{PARENT_PID_ENV, SESSION_ENV};
use common::config::env_or;
use std::env;
use std::time::Duration;
use tracker::TrackerConfig;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub session: u32,
    /// Pid of the process that spawned us. The worker exits when it is gone.
    pub parent_pid: i32,
    pub poll_interval: Duration,
    pub parent_check_interval: Duration,
    /// How long to wait for the main process's IPC resources.
    pub attach_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub tracker: TrackerConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// `STENTOR_SESSION` is required; the parent pid defaults to our actual
    /// parent when `STENTOR_PARENT_PID` is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let session: u32 = env::var(SESSION_ENV)
            .map_err(|_| anyhow::anyhow!("{SESSION_ENV} is not set"))?
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{SESSION_ENV} is not a valid session id: {e}"))?;

        let parent_pid = env_or(PARENT_PID_ENV, nix::unistd::getppid().as_raw());

        let poll_interval = Duration::from_millis(env_or("STENTOR_POLL_INTERVAL_MS", 100));
        let parent_check_interval = Duration::from_millis(env_or("STENTOR_PARENT_CHECK_MS", 500));
        let attach_timeout = Duration::from_millis(env_or("STENTOR_ATTACH_TIMEOUT_MS", 5000));

        let otel_endpoint = env::var(common::telemetry::OTLP_ENDPOINT_VAR).ok();
        let tracker = TrackerConfig::from_env()?;

        Ok(Self {
            environment,
            session,
            parent_pid,
            poll_interval,
            parent_check_interval,
            attach_timeout,
            otel_endpoint,
            tracker,
        })
    }
}
