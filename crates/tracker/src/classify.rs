use crate::tracking::Track;
use bridge::TrackState;

/// Shape plus rate-of-change rule.
///
/// Elongated bodies are `Extended`. A round body is only `Contracted` when
/// it became round quickly; a slowly changing round outline (an end-on
/// view) stays `Undetermined`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    pub circ_threshold: f64,
    pub snap_velocity: f64,
    pub min_history: usize,
}

impl Classifier {
    pub fn classify(&self, track: &Track) -> TrackState {
        if track.circularity < self.circ_threshold {
            return TrackState::Extended;
        }
        if track.history.len() < self.min_history {
            return TrackState::Undetermined;
        }
        match circularity_velocity(track) {
            Some(velocity) if velocity > self.snap_velocity => TrackState::Contracted,
            _ => TrackState::Undetermined,
        }
    }
}

/// `|c_newest - c_oldest| / dt` over the history window, `None` when the
/// window spans no time.
pub fn circularity_velocity(track: &Track) -> Option<f64> {
    let (t_old, c_old) = *track.history.front()?;
    let (t_new, c_new) = *track.history.back()?;
    let dt = t_new - t_old;
    if dt <= 0.0 {
        return None;
    }
    Some((c_new - c_old).abs() / dt)
}
