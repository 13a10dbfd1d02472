pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod events;
pub mod pacing;
pub mod pipeline;
pub mod producer;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod synthetic;
#[cfg(feature = "v4l-camera")]
pub mod v4l_source;

pub use config::{CaptureConfig, PipelineConfig, SourceKind};
#[cfg(feature = "v4l-camera")]
pub use decoder::MjpegDecoder;
pub use decoder::{FrameDecoder, YuyvDecoder};
pub use dispatcher::{DispatchStats, Dispatched, LatestMask, MaskFrame, ResultDispatcher};
pub use events::{FrameLogger, PipelineObserver, ShmReady, TracingFrameLogger, TracingObserver};
pub use pacing::FramePacer;
pub use pipeline::PipelineChannels;
pub use producer::{FrameProducer, FrameProducerHandle, ProducerConfig, ProducerStats, Tick};
pub use sink::{FrameSink, PreviewSink};
pub use source::CaptureSource;
pub use supervisor::{WorkerStop, WorkerSupervisor};
pub use synthetic::{Organism, SyntheticSource};
#[cfg(feature = "v4l-camera")]
pub use v4l_source::V4lSource;
