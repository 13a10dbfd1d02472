pub mod blobs;
pub mod classify;
pub mod config;
pub mod errors;
pub mod segmentation;
pub mod tracker;
pub mod tracking;

pub use blobs::{Blob, BlobFilter, BoundingBox, extract_blobs};
pub use classify::Classifier;
pub use config::TrackerConfig;
pub use errors::TrackerError;
pub use segmentation::Segmenter;
pub use tracker::{FrameAnalysis, OrganismTracker};
pub use tracking::{Track, TrackTable};
