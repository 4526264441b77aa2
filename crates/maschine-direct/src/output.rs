//! HID output reports (LEDs)
//!
//! Two output reports drive every light on the device. Report 0x80 sets
//! button brightness in the fixed illumination order; report 0x81 sets the
//! touchstrip segments followed by the pad colors. Reports are rebuilt in
//! full from stored state on every update, never patched incrementally.

use maschine_core::{Scales, PAD_COUNT};

use crate::buttons::{pad_position, Button, ILLUMINATION_MAP};

/// Output report setting button brightness.
pub const REPORT_BUTTONS: u8 = 0x80;
/// Output report setting touchstrip and pad colors.
pub const REPORT_PADS: u8 = 0x81;

/// Payload size of both output reports.
const OUTPUT_REPORT_SIZE: usize = 64;

/// Number of touchstrip LED segments.
pub const TOUCHSTRIP_LED_COUNT: usize = 25;

const PAD_COLOR_OFFSET: usize = TOUCHSTRIP_LED_COUNT;

/// Supplies the brightness for each button when rebuilding report 0x80.
pub trait BrightnessProvider {
    fn brightness(&self, button: Button) -> u8;
}

/// Stored LED state, one color slot per note so a pad keeps its color
/// when the grid scrolls.
pub struct OutputState {
    scales: Scales,
    note_color: [u8; 128],
    touchstrip_color: [u8; TOUCHSTRIP_LED_COUNT],
}

impl OutputState {
    pub fn new(scales: Scales) -> Self {
        Self {
            scales,
            note_color: [0; 128],
            touchstrip_color: [0; TOUCHSTRIP_LED_COUNT],
        }
    }

    pub fn set_scales(&mut self, scales: Scales) {
        self.scales = scales;
    }

    pub fn set_note_color(&mut self, note: u8, color: u8) {
        self.note_color[note as usize & 0x7f] = color;
    }

    pub fn set_touchstrip_led(&mut self, index: usize, color: u8) {
        if let Some(slot) = self.touchstrip_color.get_mut(index) {
            *slot = color;
        }
    }

    /// Build report 0x81: touchstrip segments, then pad colors in wire
    /// order. The leading byte is the report id.
    pub fn pad_report(&self) -> Vec<u8> {
        let mut report = vec![0u8; 1 + OUTPUT_REPORT_SIZE];
        report[0] = REPORT_PADS;

        report[1..1 + TOUCHSTRIP_LED_COUNT].copy_from_slice(&self.touchstrip_color);

        for pad in 0..PAD_COUNT {
            let color = self.note_color[self.scales.color_note_for_pad(pad) as usize];
            report[1 + PAD_COLOR_OFFSET + pad_position(pad)] = color;
        }

        report
    }

    /// Build report 0x80 by querying the provider for every button in
    /// illumination order.
    pub fn button_report(&self, provider: &dyn BrightnessProvider) -> Vec<u8> {
        let mut report = vec![0u8; 1 + OUTPUT_REPORT_SIZE];
        report[0] = REPORT_BUTTONS;
        for (i, button) in ILLUMINATION_MAP.iter().enumerate() {
            report[1 + i] = provider.brightness(*button);
        }
        report
    }

    /// All-dark button report, sent during shutdown.
    pub fn blank_button_report() -> Vec<u8> {
        let mut report = vec![0u8; 1 + OUTPUT_REPORT_SIZE];
        report[0] = REPORT_BUTTONS;
        report
    }
}
