//! Interrupt to main-loop hand-off slots.
//!
//! A slot has exactly one writer (an interrupt handler, already inside a
//! critical section) and one reader (the main loop). The reader can only
//! read-and-clear. A second post before the reader runs overwrites the
//! first one; there is no queue behind a slot.

use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

use crate::debounce::Edge;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum KeyEvent {
    #[default]
    None,
    Press,
    Release,
}

impl From<Edge> for KeyEvent {
    fn from(edge: Edge) -> Self {
        match edge {
            Edge::Press => KeyEvent::Press,
            Edge::Release => KeyEvent::Release,
        }
    }
}

pub struct EventSlot<T: Copy> {
    value: Mutex<Cell<T>>,
    empty: T,
}

impl<T: Copy> EventSlot<T> {
    pub const fn new(empty: T) -> Self {
        Self {
            value: Mutex::new(Cell::new(empty)),
            empty,
        }
    }

    /// Writer side. Called from interrupt context.
    #[inline(always)]
    pub fn post(&self, cs: CriticalSection<'_>, value: T) {
        self.value.borrow(cs).set(value);
    }

    /// Reader side. Returns the pending value and leaves the slot empty.
    #[inline]
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.value.borrow(cs).replace(self.empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_slot() {
        let slot = EventSlot::new(KeyEvent::None);
        critical_section::with(|cs| slot.post(cs, KeyEvent::Press));
        assert_eq!(slot.take(), KeyEvent::Press);
        assert_eq!(slot.take(), KeyEvent::None);
    }

    #[test]
    fn unread_post_is_overwritten() {
        let slot = EventSlot::new(false);
        critical_section::with(|cs| {
            slot.post(cs, true);
            slot.post(cs, true);
        });
        assert!(slot.take());
        assert!(!slot.take());
    }

    #[test]
    fn edges_convert_to_events() {
        assert_eq!(KeyEvent::from(Edge::Press), KeyEvent::Press);
        assert_eq!(KeyEvent::from(Edge::Release), KeyEvent::Release);
    }
}
