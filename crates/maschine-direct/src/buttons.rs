//! Physical controls of the Maschine mk3
//!
//! Two reverse-engineered tables tie the hardware to the HID reports. The
//! input table maps each bit of the nine button bytes in report 0x01 to a
//! control; the illumination table fixes the order of brightness bytes in
//! output report 0x80. Both were recovered by observation and must not be
//! reordered.

/// Number of button-state bytes in a digital input report.
pub const BUTTON_BYTES: usize = 9;

/// Number of mode knobs under the displays.
pub const KNOB_COUNT: usize = 8;

/// A physical button (or touch sensor) on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Channel,
    PlugIn,
    Arranger,
    Mixer,
    Browser,
    Sampling,
    PageLeft,
    PageRight,
    File,
    Settings,
    Auto,
    Macro,
    // The eight soft buttons above the displays.
    Display1,
    Display2,
    Display3,
    Display4,
    Display5,
    Display6,
    Display7,
    Display8,
    Volume,
    Swing,
    NoteRepeat,
    Tempo,
    Lock,
    Pitch,
    Mod,
    Perform,
    Notes,
    GroupA,
    GroupB,
    GroupC,
    GroupD,
    GroupE,
    GroupF,
    GroupG,
    GroupH,
    Restart,
    Erase,
    TapMetro,
    Follow,
    Play,
    Record,
    Stop,
    Shift,
    FixedVel,
    PadMode,
    Keyboard,
    Chords,
    Step,
    Scene,
    Pattern,
    Events,
    Variation,
    Duplicate,
    Select,
    Solo,
    Mute,
    Up,
    Down,
    Left,
    Right,
    Encoder,
    EncoderTouch,
    Pedal,
}

use Button::*;

/// Button carried by each bit of the digital report, listed MSB first.
/// `None` marks unused bits.
const INPUT_MAP: [[Option<Button>; 8]; BUTTON_BYTES] = [
    [
        Some(Display8),
        Some(Shift),
        Some(Left),
        Some(Down),
        Some(Right),
        Some(Up),
        None,
        Some(Encoder),
    ],
    [
        Some(GroupH),
        Some(GroupG),
        Some(GroupF),
        Some(GroupE),
        Some(GroupD),
        Some(GroupC),
        Some(GroupB),
        Some(GroupA),
    ],
    [
        Some(Pedal),
        None,
        Some(Lock),
        Some(NoteRepeat),
        Some(Tempo),
        Some(Swing),
        Some(Volume),
        Some(Notes),
    ],
    [
        Some(Events),
        Some(Pattern),
        Some(Scene),
        Some(FixedVel),
        Some(Step),
        Some(Chords),
        Some(Keyboard),
        Some(PadMode),
    ],
    [
        Some(Mod),
        Some(Pitch),
        Some(Mute),
        Some(Solo),
        Some(Select),
        Some(Duplicate),
        Some(Variation),
        None,
    ],
    [
        Some(Stop),
        Some(Record),
        Some(Play),
        Some(Follow),
        Some(TapMetro),
        Some(Erase),
        Some(Restart),
        Some(Perform),
    ],
    [
        None,
        None,
        Some(PlugIn),
        Some(Mixer),
        Some(Sampling),
        Some(PageRight),
        Some(Settings),
        Some(Macro),
    ],
    [
        None,
        None,
        None,
        Some(Auto),
        Some(File),
        Some(PageLeft),
        Some(Arranger),
        Some(Channel),
    ],
    [
        Some(EncoderTouch),
        Some(Display7),
        Some(Display6),
        Some(Display5),
        Some(Display4),
        Some(Display3),
        Some(Display2),
        Some(Display1),
    ],
];

/// Order of the brightness bytes in output report 0x80, one per button.
pub const ILLUMINATION_MAP: [Button; 62] = [
    Channel,
    PlugIn,
    Arranger,
    Mixer,
    Browser,
    Sampling,
    PageLeft,
    PageRight,
    File,
    Settings,
    Auto,
    Macro,
    Display1,
    Display2,
    Display3,
    Display4,
    Display5,
    Display6,
    Display7,
    Display8,
    Volume,
    Swing,
    NoteRepeat,
    Tempo,
    Lock,
    Pitch,
    Mod,
    Perform,
    Notes,
    GroupA,
    GroupB,
    GroupC,
    GroupD,
    GroupE,
    GroupF,
    GroupG,
    GroupH,
    Restart,
    Erase,
    TapMetro,
    Follow,
    Play,
    Record,
    Stop,
    Shift,
    FixedVel,
    PadMode,
    Keyboard,
    Chords,
    Step,
    Scene,
    Pattern,
    Events,
    Variation,
    Duplicate,
    Select,
    Solo,
    Mute,
    Up,
    Left,
    Right,
    Down,
];

/// Button carried by `bit_index` of button byte `byte_index`.
///
/// The table rows are listed MSB first, so bit 0 selects the last column.
pub fn button_at(byte_index: usize, bit_index: usize) -> Option<Button> {
    INPUT_MAP.get(byte_index)?.get(7usize.checked_sub(bit_index)?).copied().flatten()
}

/// Byte position of a pad within the color/pressure report sections.
///
/// The wire order runs top row first while pad 0 is bottom-left, so the
/// rows are flipped. The mapping is its own inverse.
pub fn pad_position(pad: usize) -> usize {
    let row = 3 - pad / 4;
    let col = pad % 4;
    row * 4 + col
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_illumination_entries_are_unique() {
        let unique: HashSet<_> = ILLUMINATION_MAP.iter().collect();
        assert_eq!(unique.len(), ILLUMINATION_MAP.len());
    }

    #[test]
    fn test_input_entries_are_unique() {
        let mut seen = HashSet::new();
        for row in &INPUT_MAP {
            for button in row.iter().flatten() {
                assert!(seen.insert(*button), "{:?} mapped twice", button);
            }
        }
        // 72 bits, 7 unused.
        assert_eq!(seen.len(), 65);
    }

    #[test]
    fn test_bit_lookup_is_msb_first() {
        assert_eq!(button_at(0, 7), Some(Display8));
        assert_eq!(button_at(0, 0), Some(Encoder));
        assert_eq!(button_at(0, 1), None);
        assert_eq!(button_at(8, 7), Some(EncoderTouch));
        assert_eq!(button_at(9, 0), None);
    }

    #[test]
    fn test_pad_position_flips_rows_and_is_involutive() {
        assert_eq!(pad_position(0), 12);
        assert_eq!(pad_position(15), 3);
        for pad in 0..16 {
            assert!(pad_position(pad) < 16);
            assert_eq!(pad_position(pad_position(pad)), pad);
        }
    }
}
