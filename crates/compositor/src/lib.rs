pub mod compose;
pub mod queue;
pub mod service;

pub use compose::{ComposeOptions, compose};
pub use queue::LatestQueue;
pub use service::{Compositor, CompositorStats, RenderJob, RenderedFrame, encode_jpeg};
