//! HID input report decoder
//!
//! Stateful decoder for the two input report types. Report 0x01 carries
//! button bits, knob touch bits, and knob positions; report 0x02 carries
//! pad pressures. The decoder diffs each report against its stored state
//! and emits only changes, so replaying a report is a no-op.

use maschine_core::{ButtonEvent, PadEvent, Scales, PAD_COUNT};

use crate::buttons::{button_at, pad_position, Button, BUTTON_BYTES, KNOB_COUNT};

/// Incoming report with button and knob state.
pub const REPORT_DIGITAL: u8 = 0x01;
/// Incoming report with pad pressures.
pub const REPORT_ANALOG: u8 = 0x02;

/// Raw pressure reading for an untouched pad.
const PAD_PRESSURE_MIN: u16 = 0x4000;
/// Raw pressure reading at full force.
const PAD_PRESSURE_MAX: u16 = 0x4fff;

/// Largest value a mode knob reports.
const KNOB_MAX_VALUE: u16 = 0x03ff;

const KNOB_TOUCH_BYTE: usize = 9;
const KNOB_VALUES_OFFSET: usize = 11;

/// A decoded change from a direct-access input report.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Button { button: Button, event: ButtonEvent },
    KnobTouch { knob: usize, event: ButtonEvent },
    /// A knob moved; values are normalized to [0, 1]
    KnobValue { knob: usize, value: f64, previous: f64 },
    Pad(PadEvent),
}

/// Correct a normalized knob delta for wraparound.
///
/// The knobs are endless encoders reporting an absolute position that
/// wraps from 1 back to 0. A jump of more than half the range in either
/// direction is a wrap, not a real move.
pub fn wrap_delta(value: f64, previous: f64) -> f64 {
    let delta = value - previous;
    if delta > 0.5 {
        delta - 1.0
    } else if delta < -0.5 {
        delta + 1.0
    } else {
        delta
    }
}

/// Stateful decoder for one device.
pub struct InputDecoder {
    scales: Scales,
    velocity_skew: f64,
    previous_buttons: [u8; BUTTON_BYTES],
    knob_touched: [bool; KNOB_COUNT],
    knob_value: [f64; KNOB_COUNT],
    pad_pressure: [u16; PAD_COUNT],
}

impl InputDecoder {
    pub fn new(scales: Scales, velocity_skew: f64) -> Self {
        Self {
            scales,
            velocity_skew,
            previous_buttons: [0; BUTTON_BYTES],
            knob_touched: [false; KNOB_COUNT],
            knob_value: [0.0; KNOB_COUNT],
            pad_pressure: [0; PAD_COUNT],
        }
    }

    /// Decode one report payload (report id already stripped).
    pub fn decode(&mut self, report_id: u8, data: &[u8]) -> Vec<ControlEvent> {
        match report_id {
            REPORT_DIGITAL => self.decode_digital(data),
            REPORT_ANALOG => self.decode_analog(data),
            other => {
                log::warn!("[Maschine] Unknown input report {:#04x}", other);
                Vec::new()
            }
        }
    }

    fn decode_digital(&mut self, data: &[u8]) -> Vec<ControlEvent> {
        let mut events = Vec::new();

        for byte_index in 0..BUTTON_BYTES {
            let Some(&current) = data.get(byte_index) else { break };
            let previous = self.previous_buttons[byte_index];

            for bit_index in 0..8 {
                let Some(button) = button_at(byte_index, bit_index) else {
                    continue;
                };
                let mask = 1u8 << bit_index;
                let pressed = current & mask != 0;
                let was_pressed = previous & mask != 0;

                if pressed && !was_pressed {
                    events.push(ControlEvent::Button { button, event: ButtonEvent::Down });
                } else if !pressed && was_pressed {
                    events.push(ControlEvent::Button { button, event: ButtonEvent::Up });
                }
            }

            self.previous_buttons[byte_index] = current;
        }

        if let Some(&touch_state) = data.get(KNOB_TOUCH_BYTE) {
            for bit in 0..KNOB_COUNT {
                // The wire counts the rightmost knob as 0; we count from
                // the left.
                let knob = (KNOB_COUNT - 1) - bit;
                let touched = touch_state & (1 << bit) != 0;

                if touched != self.knob_touched[knob] {
                    self.knob_touched[knob] = touched;
                    let event = if touched { ButtonEvent::Down } else { ButtonEvent::Up };
                    events.push(ControlEvent::KnobTouch { knob, event });
                }
            }
        }

        for knob in 0..KNOB_COUNT {
            let offset = KNOB_VALUES_OFFSET + 2 * knob;
            let (Some(&lsb), Some(&msb)) = (data.get(offset), data.get(offset + 1)) else {
                break;
            };
            let raw = u16::from_le_bytes([lsb, msb]);
            let value = f64::from(raw) / f64::from(KNOB_MAX_VALUE);

            let previous = self.knob_value[knob];
            if value != previous {
                self.knob_value[knob] = value;
                events.push(ControlEvent::KnobValue { knob, value, previous });
            }
        }

        events
    }

    fn decode_analog(&mut self, data: &[u8]) -> Vec<ControlEvent> {
        // Pressures reported this frame; pads absent from the report keep
        // their previous state.
        let mut new_pressure: [Option<u16>; PAD_COUNT] = [None; PAD_COUNT];

        for i in 0..PAD_COUNT {
            let triple = i * 3;
            let (Some(&pad_byte), Some(&hi), Some(&lo)) =
                (data.get(triple), data.get(triple + 1), data.get(triple + 2))
            else {
                break;
            };

            let pad = pad_position(pad_byte as usize % PAD_COUNT);
            let raw = u16::from_be_bytes([hi, lo]);
            if raw >= PAD_PRESSURE_MIN {
                new_pressure[pad] = Some(raw.min(PAD_PRESSURE_MAX) - PAD_PRESSURE_MIN);
            }
        }

        let mut events = Vec::new();
        for pad in 0..PAD_COUNT {
            let Some(pressure) = new_pressure[pad] else { continue };
            let previous = self.pad_pressure[pad];
            self.pad_pressure[pad] = pressure;

            let note = self.scales.note_for_pad(pad);
            let channel = pad as u8;

            if previous == 0 && pressure != 0 {
                events.push(ControlEvent::Pad(PadEvent::NoteOn {
                    channel,
                    note,
                    velocity: self.pressure_to_velocity(pressure),
                }));
            } else if previous != 0 && pressure != 0 && pressure != previous {
                events.push(ControlEvent::Pad(PadEvent::PolyAftertouch {
                    channel,
                    note,
                    pressure: self.pressure_to_velocity(pressure),
                }));
            } else if previous != 0 && pressure == 0 {
                events.push(ControlEvent::Pad(PadEvent::NoteOff { channel, note }));
            }
        }

        events
    }

    /// Map a pad pressure (floor already subtracted) to a MIDI velocity.
    ///
    /// A linear response blended against a quadratic bezier whose control
    /// point is set by the configured skew. Negative skew flattens the
    /// curve toward the top of the range.
    fn pressure_to_velocity(&self, pressure: u16) -> u8 {
        let max_pressure = f64::from(PAD_PRESSURE_MAX - PAD_PRESSURE_MIN);
        let position = f64::from(pressure) / max_pressure;
        let linear = position * 127.0;

        let median = 127.0 / 2.0;
        let q = median + self.velocity_skew * median;

        let bezier =
            (2.0 * (1.0 - position) * position * q + position * position * 127.0).round();

        (2.0 * linear - bezier).clamp(0.0, 127.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> InputDecoder {
        InputDecoder::new(Scales::chromatic(36), -0.85)
    }

    /// Digital payload: 9 button bytes, 1 touch byte, 1 pad byte, 8 knobs.
    fn digital_payload() -> Vec<u8> {
        vec![0u8; KNOB_VALUES_OFFSET + 2 * KNOB_COUNT]
    }

    #[test]
    fn test_button_edges_are_idempotent() {
        let mut d = decoder();
        let mut payload = digital_payload();
        payload[5] = 0x80; // Stop

        let events = d.decode_digital(&payload);
        assert_eq!(
            events,
            [ControlEvent::Button { button: Button::Stop, event: ButtonEvent::Down }]
        );

        // Same frame again: no change, no events.
        assert!(d.decode_digital(&payload).is_empty());

        payload[5] = 0;
        let events = d.decode_digital(&payload);
        assert_eq!(
            events,
            [ControlEvent::Button { button: Button::Stop, event: ButtonEvent::Up }]
        );
    }

    #[test]
    fn test_unmapped_bits_are_ignored() {
        let mut d = decoder();
        let mut payload = digital_payload();
        payload[0] = 0x02; // unused bit of byte 0
        assert!(d.decode_digital(&payload).is_empty());
    }

    #[test]
    fn test_knob_touch_mirrors_index() {
        let mut d = decoder();
        let mut payload = digital_payload();
        payload[KNOB_TOUCH_BYTE] = 0x01; // wire bit 0: rightmost knob

        let events = d.decode_digital(&payload);
        assert_eq!(
            events,
            [ControlEvent::KnobTouch { knob: 7, event: ButtonEvent::Down }]
        );

        payload[KNOB_TOUCH_BYTE] = 0x80; // wire bit 7: leftmost knob
        let events = d.decode_digital(&payload);
        assert_eq!(
            events,
            [
                ControlEvent::KnobTouch { knob: 7, event: ButtonEvent::Up },
                ControlEvent::KnobTouch { knob: 0, event: ButtonEvent::Down },
            ]
        );
    }

    #[test]
    fn test_knob_value_reports_change_with_previous() {
        let mut d = decoder();
        let mut payload = digital_payload();
        payload[KNOB_VALUES_OFFSET] = 0xff;
        payload[KNOB_VALUES_OFFSET + 1] = 0x03; // knob 0 at max

        let events = d.decode_digital(&payload);
        assert_eq!(
            events,
            [ControlEvent::KnobValue { knob: 0, value: 1.0, previous: 0.0 }]
        );

        // Unchanged values stay silent.
        assert!(d.decode_digital(&payload).is_empty());
    }

    #[test]
    fn test_wrap_delta() {
        assert!((wrap_delta(0.3, 0.2) - 0.1).abs() < 1e-9);
        // Forward across the wrap point.
        assert!((wrap_delta(0.05, 0.95) - 0.1).abs() < 1e-9);
        // Backward across the wrap point.
        assert!((wrap_delta(0.95, 0.05) + 0.1).abs() < 1e-9);
    }

    fn analog_payload(entries: &[(u8, u16)]) -> Vec<u8> {
        let mut payload = Vec::new();
        for &(pad_byte, raw) in entries {
            payload.push(pad_byte);
            payload.extend_from_slice(&raw.to_be_bytes());
        }
        // Pad out to 16 triples with below-floor readings.
        while payload.len() < PAD_COUNT * 3 {
            payload.extend_from_slice(&[0, 0, 0]);
        }
        payload
    }

    #[test]
    fn test_pad_press_aftertouch_release() {
        let mut d = decoder();

        // Wire position 12 is pad 0 (bottom-left), which plays note 36.
        let events = d.decode_analog(&analog_payload(&[(12, 0x4800)]));
        assert_eq!(events.len(), 1);
        match events[0] {
            ControlEvent::Pad(PadEvent::NoteOn { channel, note, velocity }) => {
                assert_eq!(channel, 0);
                assert_eq!(note, 36);
                assert!(velocity > 0);
            }
            ref other => panic!("expected NoteOn, got {:?}", other),
        }

        let events = d.decode_analog(&analog_payload(&[(12, 0x4c00)]));
        assert!(matches!(
            events[0],
            ControlEvent::Pad(PadEvent::PolyAftertouch { channel: 0, note: 36, .. })
        ));

        // Exactly the floor value means released.
        let events = d.decode_analog(&analog_payload(&[(12, 0x4000)]));
        assert_eq!(
            events,
            [ControlEvent::Pad(PadEvent::NoteOff { channel: 0, note: 36 })]
        );
    }

    #[test]
    fn test_pad_repeat_pressure_is_silent() {
        let mut d = decoder();
        d.decode_analog(&analog_payload(&[(12, 0x4800)]));
        assert!(d.decode_analog(&analog_payload(&[(12, 0x4800)])).is_empty());
    }

    #[test]
    fn test_velocity_curve_endpoints_and_monotonicity() {
        let d = decoder();
        assert_eq!(d.pressure_to_velocity(0), 0);
        assert_eq!(d.pressure_to_velocity(PAD_PRESSURE_MAX - PAD_PRESSURE_MIN), 127);

        let mut last = 0;
        for pressure in (0..=0x0fff).step_by(256) {
            let velocity = d.pressure_to_velocity(pressure);
            assert!(velocity >= last, "curve dipped at pressure {}", pressure);
            last = velocity;
        }
    }

    #[test]
    fn test_unknown_report_yields_nothing() {
        let mut d = decoder();
        assert!(d.decode(0x7f, &[0, 1, 2]).is_empty());
    }
}
