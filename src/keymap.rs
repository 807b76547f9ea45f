//! Mapping table: one action per physical key and per encoder virtual key.
//!
//! Actions are a tagged enum in memory. The flat `tag + 4 codes` layout only
//! exists at the edges (serial protocol and persisted image).

use crate::config::{ENCODER_CW_INDEX, ENCODER_SW_CCW_INDEX, MAX_COMBO_KEYS, NUM_TOTAL_MAPS};

pub type Combo = [u16; MAX_COMBO_KEYS];

pub const TAG_NONE: u8 = 0;
pub const TAG_KEYBOARD: u8 = 1;
pub const TAG_CONSUMER: u8 = 2;
pub const TAG_COMMAND: u8 = 3;

/// Bytes of one persisted entry: tag, then four little-endian `u16` codes.
pub const ENTRY_BYTES: usize = 1 + 2 * MAX_COMBO_KEYS;
pub const TABLE_BYTES: usize = ENTRY_BYTES * NUM_TOTAL_MAPS;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Action {
    /// Placeholder, dispatching it does nothing.
    #[default]
    None,
    /// HID keyboard usages, pressed together.
    Keyboard(Combo),
    /// HID consumer-control usages.
    Consumer(Combo),
    /// Host command, reported over serial as `CMD:<index>`.
    Command,
}

impl Action {
    /// Build from the flat representation. Unknown tags become `None`;
    /// codes of `None` and `Command` are dropped.
    pub fn from_raw(tag: u8, codes: Combo) -> Self {
        match tag {
            TAG_KEYBOARD => Action::Keyboard(codes),
            TAG_CONSUMER => Action::Consumer(codes),
            TAG_COMMAND => Action::Command,
            _ => Action::None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Action::None => TAG_NONE,
            Action::Keyboard(_) => TAG_KEYBOARD,
            Action::Consumer(_) => TAG_CONSUMER,
            Action::Command => TAG_COMMAND,
        }
    }

    pub fn codes(&self) -> Combo {
        match self {
            Action::Keyboard(codes) | Action::Consumer(codes) => *codes,
            Action::None | Action::Command => [0; MAX_COMBO_KEYS],
        }
    }
}

/// True for the five encoder-derived slots (tap semantics).
#[inline]
pub fn is_encoder_index(index: usize) -> bool {
    (ENCODER_CW_INDEX..=ENCODER_SW_CCW_INDEX).contains(&index)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keymap {
    entries: [Action; NUM_TOTAL_MAPS],
}

impl Keymap {
    pub const fn new() -> Self {
        Self { entries: [Action::None; NUM_TOTAL_MAPS] }
    }

    /// Out-of-range indices read as `None`.
    pub fn get(&self, index: usize) -> Action {
        self.entries.get(index).copied().unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, action: Action) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = action;
        }
    }

    pub fn clear(&mut self) {
        self.entries = [Action::None; NUM_TOTAL_MAPS];
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter()
    }

    pub fn encode(&self, out: &mut [u8; TABLE_BYTES]) {
        for (action, chunk) in self.entries.iter().zip(out.chunks_exact_mut(ENTRY_BYTES)) {
            chunk[0] = action.tag();
            for (code, bytes) in action.codes().iter().zip(chunk[1..].chunks_exact_mut(2)) {
                bytes.copy_from_slice(&code.to_le_bytes());
            }
        }
    }

    pub fn decode(bytes: &[u8; TABLE_BYTES]) -> Self {
        let mut map = Self::new();
        for (slot, chunk) in map.entries.iter_mut().zip(bytes.chunks_exact(ENTRY_BYTES)) {
            let mut codes = [0u16; MAX_COMBO_KEYS];
            for (code, raw) in codes.iter_mut().zip(chunk[1..].chunks_exact(2)) {
                *code = u16::from_le_bytes([raw[0], raw[1]]);
            }
            *slot = Action::from_raw(chunk[0], codes);
        }
        map
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENCODER_SW_INDEX, NUM_KEYS};

    #[test]
    fn new_table_is_all_none() {
        let map = Keymap::new();
        assert_eq!(map.iter().count(), NUM_TOTAL_MAPS);
        assert!(map.iter().all(|a| *a == Action::None));
    }

    #[test]
    fn unknown_tag_and_placeholder_codes_normalise() {
        assert_eq!(Action::from_raw(9, [1, 2, 3, 4]), Action::None);
        assert_eq!(Action::from_raw(TAG_COMMAND, [7, 0, 0, 0]), Action::Command);
        assert_eq!(Action::Command.codes(), [0; MAX_COMBO_KEYS]);
    }

    #[test]
    fn image_layout_is_tag_then_le_codes() {
        let mut map = Keymap::new();
        map.set(0, Action::Keyboard([0xE0, 0x06, 0, 0]));
        map.set(ENCODER_SW_INDEX, Action::Consumer([0x00CD, 0, 0, 0]));

        let mut image = [0u8; TABLE_BYTES];
        map.encode(&mut image);
        assert_eq!(&image[..ENTRY_BYTES], &[1, 0xE0, 0, 0x06, 0, 0, 0, 0, 0]);
        let sw = ENCODER_SW_INDEX * ENTRY_BYTES;
        assert_eq!(&image[sw..sw + 3], &[2, 0xCD, 0]);

        assert_eq!(Keymap::decode(&image), map);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut map = Keymap::new();
        map.set(NUM_TOTAL_MAPS, Action::Command);
        assert_eq!(map.get(NUM_TOTAL_MAPS), Action::None);
    }

    #[test]
    fn encoder_index_range() {
        assert!(!is_encoder_index(NUM_KEYS - 1));
        assert!((NUM_KEYS..NUM_TOTAL_MAPS).all(is_encoder_index));
        assert!(!is_encoder_index(NUM_TOTAL_MAPS));
    }
}
