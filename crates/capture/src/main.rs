use anyhow::Context;
use bridge::{DiagnosticLevel, FrameTask, IpcNames, ResultMessage};
use capture::{
    CaptureConfig, CaptureSource, FrameProducer, LatestMask, PipelineChannels, PipelineConfig,
    PipelineObserver, PreviewSink, ProducerConfig, ResultDispatcher, ShmReady, SourceKind,
    SyntheticSource, TracingFrameLogger, TracingObserver, WorkerSupervisor,
};
use common::{TelemetryGuard, setup_logging};
use compositor::{ComposeOptions, Compositor, RenderedFrame, encode_jpeg};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

const MAIN_POLL: Duration = Duration::from_millis(20);
const PREVIEW_INTERVAL: Duration = Duration::from_secs(1);
const PREVIEW_QUALITY: u8 = 85;

/// Hands the ring names to the main thread so it can start the worker.
struct MainObserver {
    ready: mpsc::Sender<ShmReady>,
    inner: TracingObserver,
}

impl PipelineObserver for MainObserver {
    fn on_shm_ready(&self, ready: &ShmReady) {
        self.inner.on_shm_ready(ready);
        let _ = self.ready.send(ready.clone());
    }

    fn on_cv_task(&self, task: &FrameTask) {
        self.inner.on_cv_task(task);
    }

    fn on_results_ready(&self, results: &ResultMessage) {
        self.inner.on_results_ready(results);
    }

    fn on_log(&self, level: DiagnosticLevel, message: &str) {
        self.inner.on_log(level, message);
    }
}

fn open_source(config: &CaptureConfig) -> Box<dyn CaptureSource> {
    match config.source {
        SourceKind::Synthetic => Box::new(
            SyntheticSource::demo(config.width, config.height)
                .with_noise(6)
                .with_fps(config.fps)
                .with_max_frames(config.max_frames),
        ),
        #[cfg(feature = "v4l-camera")]
        SourceKind::V4l => Box::new(capture::V4lSource::new(config.device_id)),
    }
}

fn write_preview(path: &Path, frame: &RenderedFrame) {
    let written = encode_jpeg(&frame.image, PREVIEW_QUALITY)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| std::fs::write(path, bytes).map_err(anyhow::Error::from));
    match written {
        Ok(()) => tracing::debug!(frame_index = frame.frame_index, path = %path.display(), "Preview written"),
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to write preview"),
    }
}

fn main() -> anyhow::Result<()> {
    let capture_config = CaptureConfig::from_env()?;
    let pipeline_config = PipelineConfig::from_env()?;

    // The OTLP exporters need a Tokio context for as long as the guard lives.
    let runtime = match &pipeline_config.otel_endpoint {
        Some(_) => Some(tokio::runtime::Runtime::new().context("Failed to start telemetry runtime")?),
        None => None,
    };
    let _rt = runtime.as_ref().map(|rt| rt.enter());
    let _telemetry = match &pipeline_config.otel_endpoint {
        Some(endpoint) => {
            match TelemetryGuard::init("stentor", endpoint, capture_config.environment) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    setup_logging(capture_config.environment);
                    tracing::warn!(error = %e, "Telemetry unavailable, logging locally");
                    None
                }
            }
        }
        None => {
            setup_logging(capture_config.environment);
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let session = std::process::id();
    let names = IpcNames::for_session(session);
    let channels = PipelineChannels::create(&names, pipeline_config.ring_capacity)
        .context("Failed to create IPC resources - check /dev/shm and mqueue limits")?;

    let (rendered_tx, rendered_rx) = mpsc::sync_channel::<RenderedFrame>(2);
    let compositor = Compositor::spawn(rendered_tx, ComposeOptions::default())
        .context("Failed to start compositor")?;
    let latest = Arc::new(LatestMask::new());
    let sink = Arc::new(PreviewSink::new(compositor, Arc::clone(&latest)));

    let (ready_tx, ready_rx) = mpsc::channel();
    let observer: Arc<dyn PipelineObserver> = Arc::new(MainObserver {
        ready: ready_tx,
        inner: TracingObserver,
    });

    let producer = FrameProducer::new(
        open_source(&capture_config),
        ProducerConfig {
            names: names.clone(),
            capacity: pipeline_config.ring_capacity,
            fps: Some(capture_config.fps),
        },
        Arc::clone(&channels.semaphore),
        Arc::clone(&channels.tasks),
        Arc::clone(&observer),
    )
    .with_sink(sink.clone());
    let producer = producer.spawn().context("Failed to start frame producer")?;

    let dispatcher = ResultDispatcher::new(
        channels.results,
        names.mask_ring.clone(),
        Arc::clone(&latest),
        Arc::clone(&observer),
        Arc::new(TracingFrameLogger),
        pipeline_config.dispatch_poll,
    )
    .spawn()
    .context("Failed to start result dispatcher")?;

    let mut supervisor = WorkerSupervisor::new(
        pipeline_config.worker_bin.clone(),
        session,
        channels.control,
        Arc::clone(&channels.tasks),
        pipeline_config.stop_timeout,
    );

    let mut last_preview: Option<Instant> = None;
    let mut worker_lost = false;
    while !shutdown.load(Ordering::Relaxed) {
        if let Ok(ready) = ready_rx.try_recv() {
            match supervisor.spawn() {
                Ok(pid) => tracing::info!(pid, frame_ring = %ready.frame_ring.display(), "Tracking worker started"),
                Err(e) => tracing::error!(error = %e, "Failed to start tracking worker, preview only"),
            }
        }

        if !worker_lost && let Some(status) = supervisor.poll_exit() {
            worker_lost = true;
            tracing::error!(%status, "Tracking worker exited, continuing with preview only");
        }

        for frame in rendered_rx.try_iter() {
            let due = last_preview.is_none_or(|at| at.elapsed() >= PREVIEW_INTERVAL);
            if let (true, Some(path)) = (due, &pipeline_config.preview_path) {
                write_preview(path, &frame);
                last_preview = Some(Instant::now());
            }
        }

        if producer.is_finished() {
            tracing::info!("Frame producer finished");
            break;
        }
        std::thread::sleep(MAIN_POLL);
    }

    tracing::info!("Shutting down");
    if !producer.stop(pipeline_config.stop_timeout) {
        tracing::warn!("Frame producer still running at shutdown");
    }
    let worker = supervisor.stop();
    let dispatched = dispatcher.stop();
    drop(rendered_rx);
    let rendered = match Arc::try_unwrap(sink) {
        Ok(sink) => Some(sink.into_compositor().stop()),
        Err(_) => None,
    };
    tracing::info!(?worker, ?dispatched, ?rendered, "Pipeline stopped");
    Ok(())
}
