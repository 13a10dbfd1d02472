use bridge::paths::DEFAULT_RING_CAPACITY;
use common::config::env_or;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub use common::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    #[cfg(feature = "v4l-camera")]
    V4l,
}

impl SourceKind {
    fn from_env() -> anyhow::Result<Self> {
        let default = if cfg!(feature = "v4l-camera") {
            "v4l"
        } else {
            "synthetic"
        };
        let value = env::var("STENTOR_SOURCE").unwrap_or_else(|_| default.to_string());
        match value.trim().to_lowercase().as_str() {
            "synthetic" => Ok(SourceKind::Synthetic),
            #[cfg(feature = "v4l-camera")]
            "v4l" => Ok(SourceKind::V4l),
            other => anyhow::bail!(
                "unsupported STENTOR_SOURCE '{other}' (synthetic{})",
                if cfg!(feature = "v4l-camera") { ", v4l" } else { "" }
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub environment: Environment,
    pub source: SourceKind,
    pub device_id: u32,
    pub fps: f64,
    /// Synthetic frame size.
    pub width: u32,
    pub height: u32,
    pub max_frames: Option<u64>,
}

impl CaptureConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();
        let source = SourceKind::from_env()?;

        let device_id = env_or("STENTOR_DEVICE_ID", 0);
        let fps: f64 = env_or("STENTOR_FPS", 30.0);
        if !(fps.is_finite() && fps > 0.0) {
            anyhow::bail!("STENTOR_FPS must be positive, got {fps}");
        }
        let width = env_or("STENTOR_WIDTH", 640);
        let height = env_or("STENTOR_HEIGHT", 480);
        let max_frames = env::var("STENTOR_MAX_FRAMES")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            environment,
            source,
            device_id,
            fps,
            width,
            height,
            max_frames,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ring_capacity: u32,
    pub worker_bin: PathBuf,
    pub stop_timeout: Duration,
    pub dispatch_poll: Duration,
    pub preview_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let ring_capacity: u32 = env_or("STENTOR_RING_CAPACITY", DEFAULT_RING_CAPACITY);
        if ring_capacity == 0 {
            anyhow::bail!("STENTOR_RING_CAPACITY must be at least 1");
        }

        let worker_bin = match env::var_os("STENTOR_WORKER_BIN") {
            Some(path) => PathBuf::from(path),
            None => default_worker_bin()?,
        };

        let stop_timeout = Duration::from_millis(env_or("STENTOR_STOP_TIMEOUT_MS", 1000));
        let dispatch_poll = Duration::from_millis(env_or("STENTOR_DISPATCH_POLL_MS", 10));
        let preview_path = env::var_os("STENTOR_PREVIEW_PATH").map(PathBuf::from);
        let otel_endpoint = env::var(common::telemetry::OTLP_ENDPOINT_VAR).ok();

        Ok(Self {
            ring_capacity,
            worker_bin,
            stop_timeout,
            dispatch_poll,
            preview_path,
            otel_endpoint,
        })
    }
}

/// `stentor-worker` next to the running executable.
fn default_worker_bin() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable {} has no parent directory", exe.display()))?;
    Ok(dir.join("stentor-worker"))
}
