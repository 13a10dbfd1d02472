use crate::blobs::Blob;
use bridge::TrackState;
use std::collections::{HashMap, VecDeque};

/// One tracked organism, owned by the tracker's [`TrackTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u64,
    /// Slowly smoothed attachment point.
    pub anchor: (f64, f64),
    pub centroid: (f64, f64),
    pub area: f64,
    pub circularity: f64,
    /// `(timestamp, circularity)`, oldest first, at most `history_len` long.
    pub history: VecDeque<(f64, f64)>,
    pub last_seen: f64,
    pub edge_reflection: bool,
    pub state: TrackState,
    /// Fixed for the track's lifetime, distinct from the state colour.
    pub debug_color: [u8; 3],
    history_len: usize,
}

impl Track {
    pub fn new(id: u64, blob: &Blob, timestamp: f64, history_len: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_len.max(1));
        history.push_back((timestamp, blob.circularity));
        Self {
            id,
            anchor: blob.centroid,
            centroid: blob.centroid,
            area: blob.area,
            circularity: blob.circularity,
            history,
            last_seen: timestamp,
            edge_reflection: blob.edge_reflection,
            state: TrackState::Undetermined,
            debug_color: [255, 255, 255],
            history_len: history_len.max(1),
        }
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.debug_color = color;
        self
    }

    /// Take the blob's measurements and nudge the anchor toward it.
    pub fn observe(&mut self, blob: &Blob, timestamp: f64, anchor_alpha: f64) {
        self.centroid = blob.centroid;
        self.area = blob.area;
        self.circularity = blob.circularity;
        self.edge_reflection = blob.edge_reflection;
        self.last_seen = timestamp;

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back((timestamp, blob.circularity));

        let (ax, ay) = self.anchor;
        let (cx, cy) = blob.centroid;
        self.anchor = (
            ax * (1.0 - anchor_alpha) + cx * anchor_alpha,
            ay * (1.0 - anchor_alpha) + cy * anchor_alpha,
        );
    }

    pub fn distance_to(&self, point: (f64, f64)) -> f64 {
        (point.0 - self.anchor.0).hypot(point.1 - self.anchor.1)
    }

    pub fn is_stale(&self, now: f64, memory_seconds: f64) -> bool {
        now - self.last_seen > memory_seconds
    }
}

/// Dense track storage with an id index.
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: Vec<Track>,
    index: HashMap<u64, usize>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn insert(&mut self, track: Track) {
        if let Some(&slot) = self.index.get(&track.id) {
            self.tracks[slot] = track;
            return;
        }
        self.index.insert(track.id, self.tracks.len());
        self.tracks.push(track);
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.index.get(&id).map(|&slot| &self.tracks[slot])
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Track> {
        self.index.get(&id).map(|&slot| &mut self.tracks[slot])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Track> {
        let slot = self.index.remove(&id)?;
        let track = self.tracks.swap_remove(slot);
        if let Some(moved) = self.tracks.get(slot) {
            self.index.insert(moved.id, slot);
        }
        Some(track)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Drop every track unseen for more than `memory_seconds`. Returns the
    /// removed ids.
    pub fn expire(&mut self, now: f64, memory_seconds: f64) -> Vec<u64> {
        let stale: Vec<u64> = self
            .tracks
            .iter()
            .filter(|t| t.is_stale(now, memory_seconds))
            .map(|t| t.id)
            .collect();
        for id in &stale {
            self.remove(*id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BoundingBox;

    fn blob_at(x: f64, y: f64, circularity: f64) -> Blob {
        Blob {
            centroid: (x, y),
            area: 300.0,
            perimeter: 60.0,
            circularity,
            bbox: BoundingBox {
                x: x as u32,
                y: y as u32,
                width: 10,
                height: 10,
            },
            edge_reflection: false,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut track = Track::new(1, &blob_at(10.0, 10.0, 0.9), 0.0, 3);
        for i in 1..=5 {
            track.observe(&blob_at(10.0, 10.0, 0.8), i as f64, 0.001);
        }
        assert_eq!(track.history.len(), 3);
        assert_eq!(track.history.front(), Some(&(3.0, 0.8)));
        assert_eq!(track.history.back(), Some(&(5.0, 0.8)));
    }

    #[test]
    fn test_anchor_moves_slowly() {
        let mut track = Track::new(1, &blob_at(0.0, 0.0, 0.9), 0.0, 10);
        track.observe(&blob_at(100.0, 0.0, 0.9), 1.0, 0.001);
        assert!((track.anchor.0 - 0.1).abs() < 1e-12);
        assert_eq!(track.centroid, (100.0, 0.0));
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut table = TrackTable::new();
        for id in 1..=4 {
            table.insert(Track::new(id, &blob_at(id as f64, 0.0, 0.9), 0.0, 10));
        }
        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert_eq!(table.len(), 3);
        for id in 2..=4 {
            assert_eq!(table.get(id).map(|t| t.id), Some(id));
        }
        table.get_mut(4).unwrap().area = 1.0;
        assert_eq!(table.get(4).unwrap().area, 1.0);
    }

    #[test]
    fn test_expire_removes_only_stale_tracks() {
        let mut table = TrackTable::new();
        table.insert(Track::new(1, &blob_at(0.0, 0.0, 0.9), 0.0, 10));
        table.insert(Track::new(2, &blob_at(50.0, 0.0, 0.9), 30.0, 10));

        assert!(table.expire(60.0, 60.0).is_empty());
        assert_eq!(table.expire(60.5, 60.0), vec![1]);
        assert!(!table.contains(1));
        assert!(table.contains(2));
    }
}
