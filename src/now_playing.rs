//! Now-playing state published for the display renderer.
//!
//! Written only by `SONG_INFO`. The renderer polls it every frame and may
//! use `position_at` to move the progress bar between host updates.

use heapless::String;

use crate::config::{DEFAULT_SONG_TITLE, MAX_SONG_LEN};
use crate::protocol::SongUpdate;

pub const TITLE_CAPACITY: usize = MAX_SONG_LEN - 1;

#[derive(Clone, Debug)]
pub struct NowPlaying {
    title: String<TITLE_CAPACITY>,
    playing: bool,
    position_ms: u32,
    duration_ms: u32,
    updated_at_ms: u64,
    revision: u32,
}

impl NowPlaying {
    pub fn new() -> Self {
        let mut title = String::new();
        push_truncated(&mut title, DEFAULT_SONG_TITLE);
        Self {
            title,
            playing: false,
            position_ms: 0,
            duration_ms: 0,
            updated_at_ms: 0,
            revision: 0,
        }
    }

    /// Apply a decoded `SONG_INFO`. Without a title nothing changes.
    /// A missing flag keeps the old one; missing times reset to 0.
    pub fn apply(&mut self, update: &SongUpdate<'_>, now_ms: u64) -> bool {
        let Some(title) = update.title else {
            return false;
        };

        self.title.clear();
        push_truncated(&mut self.title, title);
        if let Some(playing) = update.playing {
            self.playing = playing;
        }
        self.position_ms = update.position_ms.unwrap_or(0);
        self.duration_ms = update.duration_ms.unwrap_or(0);
        self.updated_at_ms = now_ms;
        self.revision = self.revision.wrapping_add(1);
        true
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Position as last reported by the host.
    pub fn position_ms(&self) -> u32 {
        self.position_ms
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    pub fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    /// Bumped on every accepted update.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Extrapolated position, capped at the duration while playing.
    pub fn position_at(&self, now_ms: u64) -> u32 {
        if !self.playing || self.duration_ms == 0 {
            return self.position_ms;
        }
        let elapsed = now_ms.saturating_sub(self.updated_at_ms);
        let pos = (self.position_ms as u64).saturating_add(elapsed);
        pos.min(self.duration_ms as u64) as u32
    }
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self::new()
    }
}

// Byte-bounded, never splits a char
fn push_truncated<const N: usize>(dst: &mut String<N>, src: &str) {
    for c in src.chars() {
        if dst.push(c).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_song;

    #[test]
    fn starts_with_placeholder_title() {
        let np = NowPlaying::new();
        assert_eq!(np.title(), DEFAULT_SONG_TITLE);
        assert!(!np.is_playing());
        assert_eq!(np.revision(), 0);
    }

    #[test]
    fn update_replaces_everything() {
        let mut np = NowPlaying::new();
        assert!(np.apply(&parse_song("Track,1,1000,5000"), 100));
        assert_eq!(np.title(), "Track");
        assert!(np.is_playing());
        assert_eq!((np.position_ms(), np.duration_ms()), (1000, 5000));
        assert_eq!(np.updated_at_ms(), 100);
        assert_eq!(np.revision(), 1);
    }

    #[test]
    fn missing_fields_default() {
        let mut np = NowPlaying::new();
        np.apply(&parse_song("A,1,1000,5000"), 0);
        np.apply(&parse_song("B"), 10);
        assert_eq!(np.title(), "B");
        assert!(np.is_playing());
        assert_eq!((np.position_ms(), np.duration_ms()), (0, 0));
    }

    #[test]
    fn no_title_is_ignored() {
        let mut np = NowPlaying::new();
        assert!(!np.apply(&parse_song(""), 10));
        assert_eq!(np.title(), DEFAULT_SONG_TITLE);
        assert_eq!(np.revision(), 0);
    }

    #[test]
    fn long_titles_are_cut_on_a_char_boundary() {
        let mut np = NowPlaying::new();
        let long = "é".repeat(40); // 80 bytes
        np.apply(&parse_song(&long), 0);
        assert!(np.title().len() <= TITLE_CAPACITY);
        assert_eq!(np.title().chars().count(), TITLE_CAPACITY / 2);
    }

    #[test]
    fn position_extrapolates_and_caps() {
        let mut np = NowPlaying::new();
        np.apply(&parse_song("T,1,1000,5000"), 10_000);
        assert_eq!(np.position_at(10_500), 1500);
        assert_eq!(np.position_at(99_999), 5000);

        np.apply(&parse_song("T,0,1000,5000"), 20_000);
        assert_eq!(np.position_at(30_000), 1000);
    }
}
