//! Structured hardware events
//!
//! Both protocol paths (NIHIA notifications and direct HID reports) decode
//! into these types. Consumers receive them through the host scheduler,
//! never on a protocol thread.

/// Discrete button edge, derived by diffing polled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Down,
    Up,
}

/// Consumer-side handler for NIHIA events.
///
/// Methods are invoked via the host scheduler only.
pub trait NiEventHandler: Send + Sync {
    fn on_button(&self, index: u32, event: ButtonEvent);
    fn on_knob(&self, index: u32, delta: i32);
    fn on_main_encoder(&self, value: i32);
    fn on_octave_changed(&self, base: i32);
}

/// A MIDI-like event synthesized from pad pressure transitions.
///
/// Each pad gets its own channel (the pad index) so downstream consumers
/// can apply per-pad pitch/expression independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    NoteOff { channel: u8, note: u8 },
}
