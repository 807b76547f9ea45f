//! Event-to-action dispatch.
//!
//! Runs in the main loop. Each iteration drains the key slots in index
//! order, then the switch tap flag, then turns whole detents of unconsumed
//! encoder ticks into virtual key taps.

use core::fmt;

use heapless::String;

use crate::config::{
    ENCODER_CCW_INDEX, ENCODER_CW_INDEX, ENCODER_SW_CCW_INDEX, ENCODER_SW_CW_INDEX,
    ENCODER_SW_INDEX, NUM_KEYS, STEPS_PER_DETENT,
};
use crate::event::KeyEvent;
use crate::hid::HidSink;
use crate::input::InputState;
use crate::keymap::{is_encoder_index, Action, Keymap};
use crate::protocol::Reply;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    /// Virtual key for this direction, the held variant while the switch is down.
    pub fn map_index(self, switch_held: bool) -> usize {
        match (self, switch_held) {
            (Rotation::Clockwise, false) => ENCODER_CW_INDEX,
            (Rotation::CounterClockwise, false) => ENCODER_CCW_INDEX,
            (Rotation::Clockwise, true) => ENCODER_SW_CW_INDEX,
            (Rotation::CounterClockwise, true) => ENCODER_SW_CCW_INDEX,
        }
    }
}

/// Tracks how much of the raw accumulator has been turned into detents.
#[derive(Debug, Default)]
pub struct DetentTracker {
    consumed: i32,
}

impl DetentTracker {
    pub const fn new() -> Self {
        Self { consumed: 0 }
    }

    /// Ticks not yet turned into detents, either sign.
    pub fn pending(&self, position: i32) -> i32 {
        position.wrapping_sub(self.consumed)
    }

    /// Consume one detent if a whole one is pending.
    pub fn next_detent(&mut self, position: i32) -> Option<Rotation> {
        let pending = self.pending(position);
        if pending >= STEPS_PER_DETENT {
            self.consumed = self.consumed.wrapping_add(STEPS_PER_DETENT);
            Some(Rotation::Clockwise)
        } else if pending <= -STEPS_PER_DETENT {
            self.consumed = self.consumed.wrapping_sub(STEPS_PER_DETENT);
            Some(Rotation::CounterClockwise)
        } else {
            None
        }
    }
}

pub struct Dispatcher {
    keymap: Keymap,
    detents: DetentTracker,
}

impl Dispatcher {
    pub fn new(keymap: Keymap) -> Self {
        Self {
            keymap,
            detents: DetentTracker::new(),
        }
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    /// Mutable table access for the configuration console.
    pub fn keymap_mut(&mut self) -> &mut Keymap {
        &mut self.keymap
    }

    /// Pull everything the interrupt handlers posted and act on it.
    ///
    /// Every event is handled even when `host` runs out of room; the first
    /// reply that did not fit is reported afterwards.
    pub fn process_events<H, const N: usize>(
        &mut self,
        input: &InputState,
        hid: &mut H,
        host: &mut String<N>,
    ) -> fmt::Result
    where
        H: HidSink,
    {
        let mut result = Ok(());
        let mut run = |this: &Self, index: usize, pressed: bool, hid: &mut H| {
            if let Err(e) = this.execute(index, pressed, hid, host) {
                log::warn!("host reply for key {} dropped", index);
                result = result.and(Err(e));
            }
        };

        for index in 0..NUM_KEYS {
            match input.buttons.take_event(index) {
                KeyEvent::Press => run(self, index, true, hid),
                KeyEvent::Release => run(self, index, false, hid),
                KeyEvent::None => {}
            }
        }

        if input.switch.take_tap() {
            run(self, ENCODER_SW_INDEX, true, hid);
        }

        let position = input.rotary.position();
        let held = input.switch.is_pressed();
        while let Some(rotation) = self.detents.next_detent(position) {
            run(self, rotation.map_index(held), true, hid);
        }
        result
    }

    /// Run the action bound to `index`.
    ///
    /// Physical keys follow the key: codes go down on press and up on
    /// release. Encoder virtual keys are taps whatever `pressed` says.
    /// Only a `Command` writes to `host`, and only whole lines.
    pub fn execute<H, const N: usize>(
        &self,
        index: usize,
        pressed: bool,
        hid: &mut H,
        host: &mut String<N>,
    ) -> fmt::Result
    where
        H: HidSink,
    {
        let action = self.keymap.get(index);
        let codes = match action {
            Action::None => return Ok(()),
            Action::Command => {
                if pressed {
                    return Reply::Command(index).append_to(host);
                }
                return Ok(());
            }
            Action::Keyboard(codes) | Action::Consumer(codes) => codes,
        };
        let active = codes.iter().copied().filter(|&c| c != 0);

        if is_encoder_index(index) {
            match action {
                Action::Consumer(_) => {
                    if codes[0] != 0 {
                        hid.write_consumer(codes[0]);
                    }
                }
                _ => {
                    for code in active.clone() {
                        hid.press_key(code);
                    }
                    for code in active {
                        hid.release_key(code);
                    }
                }
            }
            return Ok(());
        }

        for code in active {
            match (action, pressed) {
                (Action::Keyboard(_), true) => hid.press_key(code),
                (Action::Keyboard(_), false) => hid.release_key(code),
                (_, true) => hid.press_consumer(code),
                (_, false) => hid.release_consumer(code),
            }
        }
        Ok(())
    }
}
