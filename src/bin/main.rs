//! Macro pad firmware
//! ========================================
//! needs to be run in WSL2 terminal
//! source ~/export-esp.sh
//! ========================================
//!
//! Eight debounced keys and a rotary encoder with push switch, sent to the
//! host as USB HID keyboard and consumer reports. A USB CDC serial channel
//! carries the configuration protocol.

//% CHIPS: esp32s3
//% FEATURES: esp-hal/unstable

#![no_std]
#![no_main]

// Application descriptor checked by the bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

// Module imports
use macropad::{
    config::{NUM_KEYS, SCAN_PERIOD_MS},
    console::Console,
    dispatch::Dispatcher,
    hid::{ConsumerReport, Report, ReportBuilder, ReportWriter, WriteError},
    input::{handle_encoder_generic, handle_scan_generic, read_phase, InputState},
    keymap::Keymap,
    line::LineReader,
    now_playing::NowPlaying,
    stats::{MemoryStats, Usage},
    storage::ConfigStore,
    wiring::{init_board_pins, BoardPins},
};

// Core imports
use core::cell::RefCell;
use core::ptr::addr_of_mut;
use critical_section::Mutex;
use esp_backtrace as _;

// ESP-HAL imports
use esp_hal::{
    gpio::Input,
    handler, main,
    otg_fs::{Usb, UsbBus},
    ram,
    time::Duration,
    timer::{
        systimer::{SystemTimer, Unit},
        timg::TimerGroup,
        PeriodicTimer,
    },
    Blocking, Config,
};
use esp_storage::FlashStorage;

// USB stack
use usb_device::{class_prelude::UsbBusAllocator, prelude::*};
use usbd_hid::{
    descriptor::{KeyboardReport, SerializedDescriptor},
    hid_class::HIDClass,
};
use usbd_serial::SerialPort;

use heapless::String;

// Heap allocator
extern crate alloc;
use alloc::boxed::Box;

type Bus = UsbBus<Usb<'static>>;

// Config image lives in the NVS partition slot
const CONFIG_FLASH_OFFSET: u32 = 0x9000;
const CONFIG_REGION_LEN: usize = 0x6000;

const HEAP_SIZE: usize = 32 * 1024;
const SERIAL_WRITE_SPINS: u32 = 1000;

// Espressif test VID/PID
const USB_VID: u16 = 0x303A;
const USB_PID: u16 = 0x4002;

static mut EP_MEMORY: [u32; 1024] = [0; 1024];

// Shared with the interrupt handlers
static INPUT: InputState = InputState::new();

static KEYS: Mutex<RefCell<Option<[Input<'static>; NUM_KEYS]>>> = Mutex::new(RefCell::new(None));
static ENC_SW: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));
static ENC_A: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));
static ENC_B: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));
static SCAN_TIMER: Mutex<RefCell<Option<PeriodicTimer<'static, Blocking>>>> =
    Mutex::new(RefCell::new(None));

// Encoder phase change on A or B
#[handler]
#[ram]
fn encoder_handler() {
    critical_section::with(|cs| {
        let mut a = ENC_A.borrow_ref_mut(cs);
        let mut b = ENC_B.borrow_ref_mut(cs);
        if let (Some(a), Some(b)) = (a.as_mut(), b.as_mut()) {
            a.clear_interrupt();
            b.clear_interrupt();
            handle_encoder_generic(&INPUT, a, b);
        }
    });
}

// 1 kHz key scan
#[handler]
#[ram]
fn scan_handler() {
    critical_section::with(|cs| {
        if let Some(timer) = SCAN_TIMER.borrow_ref_mut(cs).as_mut() {
            timer.clear_interrupt();
        }
        let mut keys = KEYS.borrow_ref_mut(cs);
        let mut sw = ENC_SW.borrow_ref_mut(cs);
        if let (Some(keys), Some(sw)) = (keys.as_mut(), sw.as_mut()) {
            handle_scan_generic(&INPUT, keys, sw);
        }
    });
}

fn now_ms() -> u64 {
    let t = SystemTimer::unit_value(Unit::Unit0);
    t.saturating_mul(1000) / SystemTimer::ticks_per_second()
}

// HID interfaces the report builder pushes into
struct UsbHid {
    keyboard: HIDClass<'static, Bus>,
    consumer: HIDClass<'static, Bus>,
}

impl ReportWriter for UsbHid {
    fn write_report(&mut self, report: &Report) -> Result<(), WriteError> {
        let result = match *report {
            Report::Keyboard { modifier, keycodes } => self.keyboard.push_input(&KeyboardReport {
                modifier,
                reserved: 0,
                leds: 0,
                keycodes,
            }),
            Report::Consumer { usage_ids } => self.consumer.push_input(&ConsumerReport { usage_ids }),
        };
        match result {
            Ok(_) => Ok(()),
            Err(UsbError::WouldBlock) => Err(WriteError::Busy),
            Err(e) => {
                log::debug!("hid write failed: {:?}", e);
                Err(WriteError::Failed)
            }
        }
    }
}

// Heap figures for GET_STATS
struct HeapStats;

impl MemoryStats for HeapStats {
    fn ram_usage(&self) -> Usage {
        let used = esp_alloc::HEAP.used();
        Usage::new(used, used + esp_alloc::HEAP.free())
    }
}

fn poll_usb(
    usb_dev: &mut UsbDevice<'static, Bus>,
    hid: &mut ReportBuilder<UsbHid>,
    serial: &mut SerialPort<'static, Bus>,
) {
    let classes = hid.writer_mut();
    usb_dev.poll(&mut [&mut classes.keyboard, &mut classes.consumer, &mut *serial]);
}

// Push buffered replies out, polling the device while the endpoint is busy.
// Gives up when the host stops reading.
fn write_serial(
    usb_dev: &mut UsbDevice<'static, Bus>,
    hid: &mut ReportBuilder<UsbHid>,
    serial: &mut SerialPort<'static, Bus>,
    mut bytes: &[u8],
) {
    let mut spins = 0;
    while !bytes.is_empty() {
        match serial.write(bytes) {
            Ok(n) => {
                bytes = &bytes[n..];
                spins = 0;
            }
            Err(UsbError::WouldBlock) => {
                spins += 1;
                if spins > SERIAL_WRITE_SPINS {
                    log::warn!("serial host not reading, dropped {} bytes", bytes.len());
                    return;
                }
                poll_usb(usb_dev, hid, serial);
            }
            Err(e) => {
                log::warn!("serial write failed: {:?}", e);
                return;
            }
        }
    }
}

#[main]
fn main() -> ! {
    let peripherals = esp_hal::init(Config::default());

    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    // Logs go to UART0; USB serial is reserved for the host protocol
    esp_println::logger::init_logger(log::LevelFilter::Info);

    // one call gives the IO handler + all role pins from wiring.rs
    let (mut io, pins, board) = init_board_pins(peripherals);

    let BoardPins {
        keys,
        mut enc_a,
        mut enc_b,
        enc_sw,
    } = pins;

    // Read encoder phase BEFORE moving the pins
    INPUT.rotary.init(read_phase(&mut enc_a, &mut enc_b));

    // Stash pins in global state
    critical_section::with(|cs| {
        KEYS.borrow_ref_mut(cs).replace(keys);
        ENC_SW.borrow_ref_mut(cs).replace(enc_sw);
        ENC_A.borrow_ref_mut(cs).replace(enc_a);
        ENC_B.borrow_ref_mut(cs).replace(enc_b);
    });

    io.set_interrupt_handler(encoder_handler);

    // -------------------- Persistent mapping table --------------------
    let store = ConfigStore::new(
        FlashStorage::new(board.flash),
        CONFIG_FLASH_OFFSET,
        CONFIG_REGION_LEN,
    );
    let mut console = Console::new(store, HeapStats);

    let mut keymap = Keymap::new();
    match console.store_mut().load(&mut keymap) {
        Ok(outcome) => log::info!("keymap loaded: {:?}", outcome),
        Err(e) => {
            log::warn!("keymap load failed, starting empty: {}", e);
            keymap.clear();
        }
    }
    let mut dispatcher = Dispatcher::new(keymap);
    let mut now_playing = NowPlaying::new();

    // -------------------- USB composite device --------------------
    let usb = Usb::new(board.usb0, board.usb_dp, board.usb_dm);
    let usb_bus: &'static UsbBusAllocator<Bus> = Box::leak(Box::new(UsbBus::new(
        usb,
        // Only handed out once, before any interrupt can touch it
        unsafe { &mut *addr_of_mut!(EP_MEMORY) },
    )));

    let mut hid = ReportBuilder::new(UsbHid {
        keyboard: HIDClass::new(usb_bus, KeyboardReport::desc(), 1),
        consumer: HIDClass::new(usb_bus, ConsumerReport::desc(), 1),
    });
    let mut serial = SerialPort::new(usb_bus);

    let mut usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(USB_VID, USB_PID))
        .strings(&[StringDescriptors::default()
            .manufacturer("macropad")
            .product("Macro Pad")
            .serial_number("0001")])
        .expect("usb string descriptors")
        .composite_with_iads()
        .build();

    // -------------------- Key scan timer --------------------
    let tg0 = TimerGroup::new(board.timg0);
    let mut scan_timer = PeriodicTimer::new(tg0.timer0);
    scan_timer.set_interrupt_handler(scan_handler);
    scan_timer.listen();
    scan_timer
        .start(Duration::from_millis(SCAN_PERIOD_MS))
        .expect("scan timer start");
    critical_section::with(|cs| {
        SCAN_TIMER.borrow_ref_mut(cs).replace(scan_timer);
    });

    log::info!("macropad ready");

    // -------------------- Main loop --------------------
    let mut lines = LineReader::new();
    let mut rx = [0u8; 64];
    let mut out: String<512> = String::new();

    loop {
        poll_usb(&mut usb_dev, &mut hid, &mut serial);

        // Queued reports go out as the host collects them
        if usb_dev.state() == UsbDeviceState::Configured {
            hid.flush();
        } else {
            hid.discard_pending();
        }

        // Host protocol, one reply per line
        if let Ok(n) = serial.read(&mut rx) {
            let now = now_ms();
            lines.feed(&rx[..n], |line| {
                if console
                    .handle_line(line, dispatcher.keymap_mut(), &mut now_playing, now, &mut out)
                    .is_err()
                {
                    log::warn!("reply too long for buffer, dropped");
                }
                write_serial(&mut usb_dev, &mut hid, &mut serial, out.as_bytes());
                out.clear();
            });
        }

        // Keys and encoder
        if dispatcher.process_events(&INPUT, &mut hid, &mut out).is_err() {
            log::warn!("command notifications dropped");
        }

        if !out.is_empty() {
            write_serial(&mut usb_dev, &mut hid, &mut serial, out.as_bytes());
            out.clear();
        }
    }
}
