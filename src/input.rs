//! Input handling for the key bank and the rotary encoder.
//!
//! This module provides:
//! - `ButtonBank`, `EncoderSwitch` and `RotaryState` holding the state shared
//!   between the interrupt handlers and the main loop
//! - Debounced key scanning via `handle_scan_generic` (1 kHz timer interrupt)
//! - Rotary encoder quadrature decoding via `handle_encoder_generic` (pin-change interrupt)
//!
//! All shared state is protected with `critical_section`. Interrupt handlers
//! only write; the main loop only reads through the `take_*` / snapshot calls.

use core::cell::{Cell, RefCell};
use critical_section::{CriticalSection, Mutex};
use embedded_hal::digital::InputPin;

use crate::config::NUM_KEYS;
use crate::debounce::{Debouncer, Edge};
use crate::event::{EventSlot, KeyEvent};
use crate::quadrature::{phase_of, QuadratureDecoder};

// Debounced state and event slots for the physical keys
pub struct ButtonBank {
    debounce: Mutex<RefCell<[Debouncer; NUM_KEYS]>>,
    events: [EventSlot<KeyEvent>; NUM_KEYS],
}

impl ButtonBank {
    pub const fn new() -> Self {
        Self {
            debounce: Mutex::new(RefCell::new([Debouncer::new(); NUM_KEYS])),
            events: [const { EventSlot::new(KeyEvent::None) }; NUM_KEYS],
        }
    }

    fn sample(&self, cs: CriticalSection<'_>, levels: &[bool; NUM_KEYS]) {
        let mut debounce = self.debounce.borrow_ref_mut(cs);
        for (i, (state, &pressed)) in debounce.iter_mut().zip(levels.iter()).enumerate() {
            if let Some(edge) = state.update(pressed) {
                self.events[i].post(cs, edge.into());
            }
        }
    }

    /// Read-and-clear the pending event of one key.
    pub fn take_event(&self, index: usize) -> KeyEvent {
        self.events[index].take()
    }
}

// Rotary encoder state
pub struct RotaryState {
    decoder: Mutex<Cell<QuadratureDecoder>>,
    position: Mutex<Cell<i32>>,
}

impl RotaryState {
    pub const fn new() -> Self {
        Self {
            decoder: Mutex::new(Cell::new(QuadratureDecoder::new(0))),
            position: Mutex::new(Cell::new(0)),
        }
    }

    /// Seed the decoder with the pin levels read before interrupts are enabled.
    pub fn init(&self, initial_phase: u8) {
        critical_section::with(|cs| {
            self.decoder.borrow(cs).set(QuadratureDecoder::new(initial_phase));
            self.position.borrow(cs).set(0);
        });
    }

    #[inline(always)]
    fn on_phase(&self, cs: CriticalSection<'_>, phase: u8) {
        let mut decoder = self.decoder.borrow(cs).get();
        let step = decoder.update(phase);
        if step != 0 {
            let p = self.position.borrow(cs).get().wrapping_add(step as i32);
            self.position.borrow(cs).set(p);
        }
        self.decoder.borrow(cs).set(decoder);
    }

    #[inline(always)]
    fn position_in(&self, cs: CriticalSection<'_>) -> i32 {
        self.position.borrow(cs).get()
    }

    /// Raw tick accumulator. `i32` is read under a critical section to avoid tearing.
    pub fn position(&self) -> i32 {
        critical_section::with(|cs| self.position_in(cs))
    }
}

// Push switch on the encoder shaft
pub struct EncoderSwitch {
    debounce: Mutex<Cell<Debouncer>>,
    position_at_press: Mutex<Cell<i32>>,
    tap: EventSlot<bool>,
}

impl EncoderSwitch {
    pub const fn new() -> Self {
        Self {
            debounce: Mutex::new(Cell::new(Debouncer::new())),
            position_at_press: Mutex::new(Cell::new(0)),
            tap: EventSlot::new(false),
        }
    }

    fn sample(&self, cs: CriticalSection<'_>, pressed: bool, rotary: &RotaryState) {
        let mut debounce = self.debounce.borrow(cs).get();
        let edge = debounce.update(pressed);
        self.debounce.borrow(cs).set(debounce);

        match edge {
            Some(Edge::Press) => {
                self.position_at_press.borrow(cs).set(rotary.position_in(cs));
            }
            // A release only counts as a tap if the shaft did not turn while held
            Some(Edge::Release) => {
                if rotary.position_in(cs) == self.position_at_press.borrow(cs).get() {
                    self.tap.post(cs, true);
                }
            }
            None => {}
        }
    }

    /// Debounced switch level.
    pub fn is_pressed(&self) -> bool {
        critical_section::with(|cs| self.debounce.borrow(cs).get().is_pressed())
    }

    /// Read-and-clear the tap flag.
    pub fn take_tap(&self) -> bool {
        self.tap.take()
    }
}

/// Everything the two interrupt handlers write.
pub struct InputState {
    pub buttons: ButtonBank,
    pub switch: EncoderSwitch,
    pub rotary: RotaryState,
}

impl InputState {
    pub const fn new() -> Self {
        Self {
            buttons: ButtonBank::new(),
            switch: EncoderSwitch::new(),
            rotary: RotaryState::new(),
        }
    }

    /// One scanner tick with already sampled levels (`true` = pressed).
    /// Keys are scanned in index order, the switch last.
    pub fn scan(&self, keys: &[bool; NUM_KEYS], switch: bool) {
        critical_section::with(|cs| {
            self.buttons.sample(cs, keys);
            self.switch.sample(cs, switch, &self.rotary);
        });
    }

    /// One decoder step with an already sampled phase.
    #[inline(always)]
    pub fn phase_changed(&self, phase: u8) {
        critical_section::with(|cs| self.rotary.on_phase(cs, phase));
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

// Active-low with pull-up. A failed read counts as released.
#[inline(always)]
fn is_pressed<P: InputPin>(pin: &mut P) -> bool {
    pin.is_low().unwrap_or(false)
}

// Timer tick: sample every key and the switch, debounce, post edges
pub fn handle_scan_generic<K, S>(state: &InputState, keys: &mut [K; NUM_KEYS], switch: &mut S)
where
    K: InputPin,
    S: InputPin,
{
    let mut levels = [false; NUM_KEYS];
    for (level, pin) in levels.iter_mut().zip(keys.iter_mut()) {
        *level = is_pressed(pin);
    }
    let sw = is_pressed(switch);
    state.scan(&levels, sw);
}

// Pin change on either encoder phase
#[inline(always)]
pub fn handle_encoder_generic<A, B>(state: &InputState, clk: &mut A, dt: &mut B)
where
    A: InputPin,
    B: InputPin,
{
    let phase = read_phase(clk, dt);
    state.phase_changed(phase);
}

/// Current `(CLK << 1) | DT` level pair.
pub fn read_phase<A: InputPin, B: InputPin>(clk: &mut A, dt: &mut B) -> u8 {
    phase_of(clk.is_high().unwrap_or(true), dt.is_high().unwrap_or(true))
}
