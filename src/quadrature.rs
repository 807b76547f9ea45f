//! Table-driven quadrature decoding.
//!
//! Phase is `(A << 1) | B`. Each transition indexes `TRANS` with
//! `(prev << 2) | curr`; invalid (double) transitions and no-motion map to 0.

// curr order: 00, 01, 10, 11 ; prev blocks: 00, 01, 10, 11
const TRANS: [i8; 16] = [
    // prev=00
    0, -1, 1, 0,
    // prev=01
    1, 0, 0, -1,
    // prev=10
    -1, 0, 0, 1,
    // prev=11
    0, 1, -1, 0,
];

#[inline(always)]
pub fn phase_of(a_high: bool, b_high: bool) -> u8 {
    ((a_high as u8) << 1) | (b_high as u8)
}

#[derive(Copy, Clone, Debug)]
pub struct QuadratureDecoder {
    phase: u8,
}

impl QuadratureDecoder {
    pub const fn new(initial_phase: u8) -> Self {
        Self { phase: initial_phase & 0b11 }
    }

    #[inline(always)]
    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// Latch a freshly sampled phase and return the step it implies.
    ///
    /// The table is negated so that +1 is one clockwise tick with the pad's
    /// A/B wiring; every consumer of the accumulator relies on that sign.
    #[inline(always)]
    pub fn update(&mut self, phase: u8) -> i8 {
        let current = phase & 0b11;
        let step = -TRANS[((self.phase << 2) | current) as usize];
        self.phase = current;
        step
    }
}
