//! Compile-time configuration for the macro pad.
//!
//! Everything that sizes a table or tunes the input pipeline lives here so
//! the interrupt handlers, the dispatcher and the persisted layout agree.
//! Board pin assignment is in `wiring` and selected by Cargo feature.

/// Physical momentary buttons.
pub const NUM_KEYS: usize = 8;

/// Encoder-derived virtual keys that follow the buttons in the mapping table.
pub const NUM_ENCODER_MAPS: usize = 5;
pub const NUM_TOTAL_MAPS: usize = NUM_KEYS + NUM_ENCODER_MAPS;

// Virtual key indices, fixed order
pub const ENCODER_CW_INDEX: usize = NUM_KEYS;
pub const ENCODER_CCW_INDEX: usize = NUM_KEYS + 1;
pub const ENCODER_SW_INDEX: usize = NUM_KEYS + 2;
pub const ENCODER_SW_CW_INDEX: usize = NUM_KEYS + 3;
pub const ENCODER_SW_CCW_INDEX: usize = NUM_KEYS + 4;

/// Codes per mapping (combo size).
pub const MAX_COMBO_KEYS: usize = 4;

/// Scanner period. The timer interrupt runs at 1 kHz.
pub const SCAN_PERIOD_MS: u64 = 1;

/// Consecutive scan ticks a new level must hold before it is accepted (5 ms).
pub const DEBOUNCE_TICKS: u8 = 5;

/// Raw quadrature ticks per mechanical detent.
pub const STEPS_PER_DETENT: i32 = 4;

/// Validity marker stored in front of the persisted table.
pub const STORAGE_MAGIC: u16 = 0xADF1;
/// Marker value written by `RESET_CONFIG`, matches erased flash.
pub const STORAGE_ERASED_MAGIC: u16 = 0xFFFF;

/// Title buffer size, one byte is reserved so 63 bytes of text are kept.
pub const MAX_SONG_LEN: usize = 64;
pub const DEFAULT_SONG_TITLE: &str = "Waiting for the beat...";

/// Serial line buffer, one byte reserved.
pub const LINE_BUFFER_LEN: usize = 256;
