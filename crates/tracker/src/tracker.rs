use crate::blobs::{Blob, BlobFilter, extract_blobs};
use crate::classify::Classifier;
use crate::config::{MIN_HISTORY_LEN, TrackerConfig};
use crate::errors::TrackerError;
use crate::segmentation::Segmenter;
use crate::tracking::{Track, TrackTable};
use bridge::StentorState;
use image::{GrayImage, RgbImage};
use std::cmp::Ordering;

/// Seed for per-track debug colours, so runs are reproducible.
const TRACK_PALETTE_SEED: u64 = 0x57E4_7042;

/// Output of one processed frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub results: Vec<StentorState>,
    /// Post-morphology binary mask, same geometry as the frame.
    pub mask: GrayImage,
}

/// Segments frames, keeps organism identities across frames and classifies
/// each one. Owns all track state.
pub struct OrganismTracker {
    config: TrackerConfig,
    segmenter: Segmenter,
    filter: BlobFilter,
    classifier: Classifier,
    tracks: TrackTable,
    next_id: u64,
    frames_processed: u64,
    palette: fastrand::Rng,
}

impl OrganismTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let segmenter = Segmenter::new(config.adaptive_block_size, config.adaptive_c);
        let filter = BlobFilter {
            min_area: config.min_area,
            max_area: config.max_area,
            edge_margin_frac: config.edge_margin_frac,
            edge_margin_min_px: config.edge_margin_min_px,
            edge_ignore: config.edge_ignore,
        };
        let classifier = Classifier {
            circ_threshold: config.circ_threshold,
            snap_velocity: config.snap_velocity,
            min_history: MIN_HISTORY_LEN,
        };
        Self {
            config,
            segmenter,
            filter,
            classifier,
            tracks: TrackTable::new(),
            next_id: 1,
            palette: fastrand::Rng::with_seed(TRACK_PALETTE_SEED),
            frames_processed: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Run the full pipeline on an RGB frame.
    pub fn process_frame(
        &mut self,
        frame: &RgbImage,
        timestamp: f64,
    ) -> Result<FrameAnalysis, TrackerError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackerError::EmptyFrame);
        }

        let mask = {
            let _span = common::span_debug!("segmentation");
            self.segmenter.segment(frame)
        };
        let blobs = {
            let _span = common::span_debug!("blob_extraction");
            extract_blobs(&mask, &self.filter)
        };
        let results = self.process_blobs(&blobs, timestamp);

        tracing::trace!(
            blobs = blobs.len(),
            tracks = self.tracks.len(),
            results = results.len(),
            "Processed frame"
        );
        Ok(FrameAnalysis { results, mask })
    }

    /// Run the pipeline on raw interleaved RGB bytes, as copied out of a ring
    /// slot.
    pub fn process_raw(
        &mut self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        timestamp: f64,
    ) -> Result<FrameAnalysis, TrackerError> {
        let expected = width as usize * height as usize * 3;
        let geometry_error = |actual| TrackerError::FrameGeometry {
            width,
            height,
            expected,
            actual,
        };
        if pixels.len() != expected {
            return Err(geometry_error(pixels.len()));
        }
        let actual = pixels.len();
        let frame = RgbImage::from_raw(width, height, pixels).ok_or_else(|| geometry_error(actual))?;
        self.process_frame(&frame, timestamp)
    }

    /// Match, update, create, expire and classify for one frame's blobs.
    ///
    /// Matching is greedy nearest first over anchor distance, not an optimal
    /// assignment. Results list matched tracks in match order, then new ones.
    pub fn process_blobs(&mut self, blobs: &[Blob], timestamp: f64) -> Vec<StentorState> {
        self.frames_processed += 1;
        let drift = self.config.max_anchor_drift;

        let mut candidates: Vec<(f64, u64, usize)> = Vec::new();
        for track in self.tracks.iter() {
            for (b, blob) in blobs.iter().enumerate() {
                let distance = track.distance_to(blob.centroid);
                if distance < drift {
                    candidates.push((distance, track.id, b));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut blob_taken = vec![false; blobs.len()];
        let mut active: Vec<u64> = Vec::with_capacity(blobs.len());
        for (_, id, b) in candidates {
            if blob_taken[b] || active.contains(&id) {
                continue;
            }
            if let Some(track) = self.tracks.get_mut(id) {
                track.observe(&blobs[b], timestamp, self.config.anchor_alpha);
                blob_taken[b] = true;
                active.push(id);
            }
        }

        for (b, blob) in blobs.iter().enumerate() {
            if blob_taken[b] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let color = [self.palette.u8(..), self.palette.u8(..), self.palette.u8(..)];
            self.tracks.insert(
                Track::new(id, blob, timestamp, self.config.history_len).with_color(color),
            );
            tracing::debug!(
                track_id = id,
                x = blob.centroid.0,
                y = blob.centroid.1,
                color = ?color,
                "New track"
            );
            active.push(id);
        }

        for id in self.tracks.expire(timestamp, self.config.memory_seconds) {
            tracing::debug!(track_id = id, "Track expired");
        }

        let classifier = self.classifier;
        active
            .iter()
            .filter_map(|&id| {
                let track = self.tracks.get_mut(id)?;
                track.state = classifier.classify(track);
                Some(StentorState {
                    id: track.id,
                    centroid: track.centroid,
                    area: track.area,
                    circularity: track.circularity,
                    state: track.state,
                    timestamp,
                    debug_color: track.state.color(),
                    edge_reflection: track.edge_reflection,
                })
            })
            .collect()
    }
}
