use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

/// Per-frame worker metrics, exported when telemetry is enabled.
pub struct WorkerMetrics {
    pub duration: Histogram<f64>,
    pub frames: Counter<u64>,
    pub torn: Counter<u64>,
    pub failures: Counter<u64>,
    pub dropped_results: Counter<u64>,
    pub tracks: Counter<u64>,
}

impl WorkerMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.001, 0.002, 0.005, 0.0075, 0.01, 0.015, 0.02, 0.03, 0.05, 0.075, 0.1, 0.2, 0.5,
        ];
        Self {
            duration: meter
                .f64_histogram("tracking_duration_seconds")
                .with_description("Time to validate, segment, track and publish one frame")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            frames: meter
                .u64_counter("tracking_frames_total")
                .with_description("Frames tracked and published")
                .build(),
            torn: meter
                .u64_counter("tracking_frames_torn_total")
                .with_description("Frames discarded because the slot was overwritten")
                .build(),
            failures: meter
                .u64_counter("tracking_frames_failed_total")
                .with_description("Frames whose processing failed")
                .build(),
            dropped_results: meter
                .u64_counter("tracking_results_dropped_total")
                .with_description("Results dropped because the result queue was full")
                .build(),
            tracks: meter
                .u64_counter("tracking_states_total")
                .with_description("Per-track states emitted")
                .build(),
        }
    }
}
