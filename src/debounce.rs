//! Counter debouncer for one digital line.
//!
//! The new level has to be seen on `DEBOUNCE_TICKS` consecutive samples;
//! a single sample that agrees with the stable level starts the count over.

use crate::config::DEBOUNCE_TICKS;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    Press,
    Release,
}

#[derive(Copy, Clone, Debug)]
pub struct Debouncer {
    stable: bool,
    mismatch: u8,
}

impl Debouncer {
    pub const fn new() -> Self {
        Self { stable: false, mismatch: 0 }
    }

    /// Current accepted level (`true` = pressed).
    #[inline]
    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Feed one raw sample. Returns the edge when the threshold is crossed.
    #[inline]
    pub fn update(&mut self, pressed: bool) -> Option<Edge> {
        if pressed == self.stable {
            self.mismatch = 0;
            return None;
        }

        self.mismatch += 1;
        if self.mismatch < DEBOUNCE_TICKS {
            return None;
        }

        self.stable = pressed;
        self.mismatch = 0;
        Some(if pressed { Edge::Press } else { Edge::Release })
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}
