// Board-specific pin mappings and initialization.
// The profile is selected via Cargo features; only "esp32s3" exists so far.
//! The following wiring is assumed:
//! - KEY0..KEY7 => GPIO4, GPIO5, GPIO6, GPIO7, GPIO8, GPIO9, GPIO10, GPIO16
//! - Rotary encoder A  => GPIO1
//! - Rotary encoder B  => GPIO2
//! - Rotary encoder SW => GPIO11
//! - USB D- => GPIO19, USB D+ => GPIO20 (native OTG port)
//! - GND => GND
//! Keys and the encoder switch connect to GND when pressed (internal pull-ups).
//! The encoder common pin goes to GND; both phases use internal pull-ups.

use esp_hal::gpio::{Event, Input, InputConfig, Io, Pull};
use esp_hal::peripherals::{Peripherals, FLASH, GPIO19, GPIO20, TIMG0, USB0};

use crate::config::NUM_KEYS;

pub struct BoardPins<'a> {
    pub keys: [Input<'a>; NUM_KEYS],
    pub enc_a: Input<'a>,
    pub enc_b: Input<'a>,
    pub enc_sw: Input<'a>,
}

/// Peripherals the firmware needs besides the GPIOs.
pub struct BoardPeripherals<'a> {
    pub usb0: USB0<'a>,
    pub usb_dp: GPIO20<'a>,
    pub usb_dm: GPIO19<'a>,
    pub timg0: TIMG0<'a>,
    pub flash: FLASH<'a>,
}

#[cfg(feature = "esp32s3")]
pub fn init_board_pins<'a>(p: Peripherals) -> (Io<'a>, BoardPins<'a>, BoardPeripherals<'a>) {
    let io = Io::new(p.IO_MUX);

    let pull_up = InputConfig::default().with_pull(Pull::Up);

    // keys are polled by the scan timer, no edge interrupts
    let keys = [
        Input::new(p.GPIO4, pull_up),
        Input::new(p.GPIO5, pull_up),
        Input::new(p.GPIO6, pull_up),
        Input::new(p.GPIO7, pull_up),
        Input::new(p.GPIO8, pull_up),
        Input::new(p.GPIO9, pull_up),
        Input::new(p.GPIO10, pull_up),
        Input::new(p.GPIO16, pull_up),
    ];
    let enc_sw = Input::new(p.GPIO11, pull_up);

    // rotary encoder phases
    let mut enc_a = Input::new(p.GPIO1, pull_up);
    let mut enc_b = Input::new(p.GPIO2, pull_up);
    enc_a.listen(Event::AnyEdge);
    enc_b.listen(Event::AnyEdge);

    (
        io,
        BoardPins { keys, enc_a, enc_b, enc_sw },
        BoardPeripherals {
            usb0: p.USB0,
            usb_dp: p.GPIO20,
            usb_dm: p.GPIO19,
            timg0: p.TIMG0,
            flash: p.FLASH,
        },
    )
}
