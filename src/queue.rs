use rand::seq::SliceRandom;

use crate::track::Track;

/// Per-guild ordered track list. Insertion-ordered; mutated only by
/// append, clear, replace and shuffle.
#[derive(Debug, Default, Clone)]
pub struct TrackQueue {
    tracks: Vec<Track>,
}

impl TrackQueue {
    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Swap in a whole new track list.
    pub fn replace(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
    }

    /// Randomly permutes every track except the one at `cursor`, which is
    /// reinserted at the same index. The currently playing track never
    /// moves; everything else is redistributed uniformly.
    pub fn shuffle_keeping_current(&mut self, cursor: usize) {
        if self.tracks.len() < 2 {
            return;
        }
        let mut shuffled = std::mem::take(&mut self.tracks);
        if cursor >= shuffled.len() {
            // Past-end cursor: nothing is pinned.
            shuffled.shuffle(&mut rand::thread_rng());
        } else {
            let current = shuffled.remove(cursor);
            shuffled.shuffle(&mut rand::thread_rng());
            shuffled.insert(cursor, current);
        }
        self.replace(shuffled);
    }
}
