#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod console;
pub mod debounce;
pub mod dispatch;
pub mod event;
pub mod hid;
pub mod input;
pub mod keymap;
pub mod line;
pub mod now_playing;
pub mod protocol;
pub mod quadrature;
pub mod stats;
pub mod storage;

#[cfg(feature = "esp32s3")]
pub mod wiring;
