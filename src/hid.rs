//! HID emission.
//!
//! The dispatcher talks to a [`HidSink`]. [`ReportBuilder`] is the sink used
//! on hardware: it keeps the boot keyboard report and a four-usage consumer
//! report current, queues every changed snapshot and hands the queue to a
//! [`ReportWriter`] (the USB class lives in the firmware binary) as fast as
//! the host collects it. A busy endpoint never drops a report.
//!
//! Usages are reference counted, so a tap of a code that a held key already
//! asserts leaves it asserted.

use heapless::Deque;
use usbd_hid::descriptor::generator_prelude::*;

/// Opaque key/consumer emitter. No feedback is expected.
pub trait HidSink {
    fn press_key(&mut self, code: u16);
    fn release_key(&mut self, code: u16);
    fn press_consumer(&mut self, code: u16);
    fn release_consumer(&mut self, code: u16);

    /// Single consumer pulse.
    fn write_consumer(&mut self, code: u16) {
        self.press_consumer(code);
        self.release_consumer(code);
    }
}

pub const ROLLOVER: usize = 6;
pub const CONSUMER_SLOTS: usize = 4;
pub const QUEUE_LEN: usize = 32;

/// Consumer control report with four simultaneous usages.
#[gen_hid_descriptor(
    (collection = APPLICATION, usage_page = CONSUMER, usage = CONSUMER_CONTROL) = {
        (usage_page = CONSUMER, usage_min = 0x00, usage_max = 0x514) = {
            #[item_settings data,array,absolute,not_null] usage_ids=input;
        };
    }
)]
#[allow(dead_code)]
pub struct ConsumerReport {
    pub usage_ids: [u16; 4],
}

/// Snapshot of one interface's state, queued until the host takes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Report {
    Keyboard { modifier: u8, keycodes: [u8; ROLLOVER] },
    Consumer { usage_ids: [u16; CONSUMER_SLOTS] },
}

impl Report {
    fn same_interface(&self, other: &Report) -> bool {
        matches!(
            (self, other),
            (Report::Keyboard { .. }, Report::Keyboard { .. })
                | (Report::Consumer { .. }, Report::Consumer { .. })
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteError {
    /// Endpoint still holds the previous report; try again after a poll.
    Busy,
    /// Report cannot be sent at all.
    Failed,
}

pub trait ReportWriter {
    fn write_report(&mut self, report: &Report) -> Result<(), WriteError>;
}

const MODIFIER_FIRST: u16 = 0xE0;
const MODIFIER_LAST: u16 = 0xE7;

// Usage slots with a hold count each, packed from the front
struct HeldUsages<const N: usize> {
    usages: [u16; N],
    counts: [u8; N],
}

impl<const N: usize> HeldUsages<N> {
    const fn new() -> Self {
        Self { usages: [0; N], counts: [0; N] }
    }

    /// `Ok(true)` when the usage became visible, `Err` when all slots are taken.
    fn press(&mut self, usage: u16) -> Result<bool, ()> {
        if let Some(i) = self.usages.iter().position(|&u| u == usage) {
            self.counts[i] = self.counts[i].saturating_add(1);
            return Ok(false);
        }
        let i = self.usages.iter().position(|&u| u == 0).ok_or(())?;
        self.usages[i] = usage;
        self.counts[i] = 1;
        Ok(true)
    }

    /// `true` when the usage went away.
    fn release(&mut self, usage: u16) -> bool {
        let Some(i) = self.usages.iter().position(|&u| u == usage) else {
            return false;
        };
        self.counts[i] -= 1;
        if self.counts[i] > 0 {
            return false;
        }
        self.usages.copy_within(i + 1.., i);
        self.counts.copy_within(i + 1.., i);
        self.usages[N - 1] = 0;
        self.counts[N - 1] = 0;
        true
    }
}

pub struct ReportBuilder<W> {
    writer: W,
    modifiers: [u8; 8],
    keys: HeldUsages<ROLLOVER>,
    consumer: HeldUsages<CONSUMER_SLOTS>,
    pending: Deque<Report, QUEUE_LEN>,
}

impl<W: ReportWriter> ReportBuilder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            modifiers: [0; 8],
            keys: HeldUsages::new(),
            consumer: HeldUsages::new(),
            pending: Deque::new(),
        }
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Reports waiting for the host.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Hand queued reports to the writer, oldest first, until it is busy.
    pub fn flush(&mut self) {
        while let Some(report) = self.pending.front() {
            match self.writer.write_report(report) {
                Ok(()) => {}
                Err(WriteError::Busy) => return,
                Err(WriteError::Failed) => log::debug!("hid report dropped: {:?}", report),
            }
            self.pending.pop_front();
        }
    }

    /// Forget queued reports, e.g. while the host has not configured the device.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    fn keyboard_report(&self) -> Report {
        let modifier = self
            .modifiers
            .iter()
            .enumerate()
            .fold(0u8, |bits, (i, &count)| if count > 0 { bits | (1 << i) } else { bits });
        let mut keycodes = [0u8; ROLLOVER];
        for (dst, &usage) in keycodes.iter_mut().zip(self.keys.usages.iter()) {
            *dst = usage as u8;
        }
        Report::Keyboard { modifier, keycodes }
    }

    fn consumer_report(&self) -> Report {
        Report::Consumer { usage_ids: self.consumer.usages }
    }

    fn enqueue(&mut self, report: Report) {
        if let Err(report) = self.pending.push_back(report) {
            // Full: snapshots are absolute, the newest state of an interface wins
            log::debug!("hid queue full, coalescing");
            if let Some(last) = self.pending.iter_mut().rev().find(|r| r.same_interface(&report)) {
                *last = report;
            }
        }
        self.flush();
    }
}

fn modifier_index(code: u16) -> Option<usize> {
    (MODIFIER_FIRST..=MODIFIER_LAST)
        .contains(&code)
        .then(|| (code - MODIFIER_FIRST) as usize)
}

fn key_usage(code: u16) -> Option<u16> {
    match u8::try_from(code) {
        Ok(0) => None,
        Ok(_) => Some(code),
        Err(_) => {
            log::debug!("keyboard usage {:#06x} out of range", code);
            None
        }
    }
}

impl<W: ReportWriter> HidSink for ReportBuilder<W> {
    fn press_key(&mut self, code: u16) {
        if let Some(i) = modifier_index(code) {
            self.modifiers[i] = self.modifiers[i].saturating_add(1);
            if self.modifiers[i] == 1 {
                self.enqueue(self.keyboard_report());
            }
            return;
        }

        let Some(usage) = key_usage(code) else {
            return;
        };
        match self.keys.press(usage) {
            Ok(true) => self.enqueue(self.keyboard_report()),
            Ok(false) => {}
            Err(()) => log::debug!("rollover full, dropped usage {:#04x}", usage),
        }
    }

    fn release_key(&mut self, code: u16) {
        if let Some(i) = modifier_index(code) {
            if self.modifiers[i] > 0 {
                self.modifiers[i] -= 1;
                if self.modifiers[i] == 0 {
                    self.enqueue(self.keyboard_report());
                }
            }
            return;
        }

        let Some(usage) = key_usage(code) else {
            return;
        };
        if self.keys.release(usage) {
            self.enqueue(self.keyboard_report());
        }
    }

    fn press_consumer(&mut self, code: u16) {
        if code == 0 {
            return;
        }
        match self.consumer.press(code) {
            Ok(true) => self.enqueue(self.consumer_report()),
            Ok(false) => {}
            Err(()) => log::debug!("consumer slots full, dropped usage {:#06x}", code),
        }
    }

    fn release_consumer(&mut self, code: u16) {
        if code != 0 && self.consumer.release(code) {
            self.enqueue(self.consumer_report());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    /// Accepts one report, then stays busy until the host polls.
    #[derive(Default)]
    struct Endpoint {
        armed: bool,
        sent: Vec<Report, 64>,
    }

    impl Endpoint {
        fn host_poll(&mut self) {
            self.armed = false;
        }
    }

    impl ReportWriter for Endpoint {
        fn write_report(&mut self, report: &Report) -> Result<(), WriteError> {
            if self.armed {
                return Err(WriteError::Busy);
            }
            self.armed = true;
            self.sent.push(*report).map_err(|_| WriteError::Failed)
        }
    }

    fn drain(hid: &mut ReportBuilder<Endpoint>) {
        while hid.pending() > 0 {
            hid.writer_mut().host_poll();
            hid.flush();
        }
        hid.writer_mut().host_poll();
    }

    fn keyboard(modifier: u8, keys: &[u8]) -> Report {
        let mut keycodes = [0u8; ROLLOVER];
        keycodes[..keys.len()].copy_from_slice(keys);
        Report::Keyboard { modifier, keycodes }
    }

    fn consumer(usages: &[u16]) -> Report {
        let mut usage_ids = [0u16; CONSUMER_SLOTS];
        usage_ids[..usages.len()].copy_from_slice(usages);
        Report::Consumer { usage_ids }
    }

    #[test]
    fn modifiers_go_to_the_bitmap() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.press_key(0xE0); // left ctrl
        hid.press_key(0xE1); // left shift
        hid.press_key(0x06); // c
        hid.release_key(0x06);
        hid.release_key(0xE1);
        hid.release_key(0xE0);
        drain(&mut hid);

        let sent = &hid.writer_mut().sent;
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[0], keyboard(0b01, &[]));
        assert_eq!(sent[2], keyboard(0b11, &[0x06]));
        assert_eq!(sent[5], keyboard(0, &[]));
    }

    #[test]
    fn busy_endpoint_keeps_the_release() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.write_consumer(0x00E9);
        assert_eq!(hid.writer_mut().sent.as_slice(), &[consumer(&[0x00E9])]);
        assert_eq!(hid.pending(), 1);

        drain(&mut hid);
        assert_eq!(
            hid.writer_mut().sent.as_slice(),
            &[consumer(&[0x00E9]), consumer(&[])]
        );
    }

    #[test]
    fn keyboard_tap_reaches_the_host_in_order() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        for code in [0xE0, 0x2B] {
            hid.press_key(code);
        }
        for code in [0xE0, 0x2B] {
            hid.release_key(code);
        }
        drain(&mut hid);
        assert_eq!(
            hid.writer_mut().sent.as_slice(),
            &[
                keyboard(0b01, &[]),
                keyboard(0b01, &[0x2B]),
                keyboard(0, &[0x2B]),
                keyboard(0, &[]),
            ]
        );
    }

    #[test]
    fn full_queue_keeps_the_latest_state() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.press_key(0x04);
        // endpoint busy from here on
        for _ in 0..QUEUE_LEN {
            hid.press_key(0x05);
            hid.release_key(0x05);
        }
        assert_eq!(hid.pending(), QUEUE_LEN);
        hid.release_key(0x04);
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.last(), Some(&keyboard(0, &[])));
    }

    #[test]
    fn release_keeps_slots_packed() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        for code in [0x04, 0x05, 0x06] {
            hid.press_key(code);
        }
        hid.release_key(0x04);
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.last(), Some(&keyboard(0, &[0x05, 0x06])));
    }

    #[test]
    fn overflow_and_out_of_range_are_not_reported() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        for code in 0x04..0x0A {
            hid.press_key(code);
        }
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.len(), 6);

        hid.press_key(0x20);
        hid.press_key(0x1234);
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.len(), 6);
    }

    #[test]
    fn consumer_combo_holds_every_usage() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.press_consumer(0x00E9);
        hid.press_consumer(0x00B5);
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.last(), Some(&consumer(&[0x00E9, 0x00B5])));

        hid.release_consumer(0x00E9);
        drain(&mut hid);
        assert_eq!(hid.writer_mut().sent.last(), Some(&consumer(&[0x00B5])));
    }

    #[test]
    fn pulse_leaves_held_usages_alone() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.press_consumer(0x00E9);
        hid.press_consumer(0x00B5);
        hid.write_consumer(0x00CD);
        drain(&mut hid);
        assert_eq!(
            &hid.writer_mut().sent[2..],
            &[consumer(&[0x00E9, 0x00B5, 0x00CD]), consumer(&[0x00E9, 0x00B5])]
        );
    }

    #[test]
    fn tap_of_a_held_code_does_not_release_it() {
        let mut hid = ReportBuilder::new(Endpoint::default());
        hid.press_consumer(0x00E9);
        hid.write_consumer(0x00E9);
        hid.press_key(0xE0);
        hid.press_key(0xE0);
        hid.release_key(0xE0);
        drain(&mut hid);

        let sent = hid.writer_mut().sent.clone();
        assert_eq!(sent.as_slice(), &[consumer(&[0x00E9]), keyboard(0b01, &[])]);
    }
}
