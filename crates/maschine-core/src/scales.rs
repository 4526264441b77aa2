//! Pad-to-note scales
//!
//! Maps the 4x4 pad grid to note numbers: an offset matrix (the active
//! scale) plus a configurable base note. The default is chromatic with
//! pad 0 at the bottom-left playing the base note.

/// Number of pads on the grid.
pub const PAD_COUNT: usize = 16;

/// Active pad-to-note mapping.
#[derive(Debug, Clone)]
pub struct Scales {
    /// Per-pad semitone offsets from the base note
    matrix: [u8; PAD_COUNT],
    /// First note of the grid
    base_note: u8,
}

impl Default for Scales {
    fn default() -> Self {
        Self::chromatic(36)
    }
}

impl Scales {
    /// Chromatic layout: pad index equals semitone offset.
    pub fn chromatic(base_note: u8) -> Self {
        let mut matrix = [0u8; PAD_COUNT];
        for (i, slot) in matrix.iter_mut().enumerate() {
            *slot = i as u8;
        }
        Self { matrix, base_note }
    }

    /// Custom offset matrix.
    pub fn with_matrix(matrix: [u8; PAD_COUNT], base_note: u8) -> Self {
        Self { matrix, base_note }
    }

    pub fn base_note(&self) -> u8 {
        self.base_note
    }

    pub fn set_base_note(&mut self, base_note: u8) {
        self.base_note = base_note;
    }

    /// Note played by a pad, clamped to the MIDI range.
    pub fn note_for_pad(&self, pad: usize) -> u8 {
        let offset = self.matrix.get(pad).copied().unwrap_or(0);
        self.base_note.saturating_add(offset).min(127)
    }

    /// Note whose color a pad displays: pad index plus base note,
    /// independent of the active matrix.
    pub fn color_note_for_pad(&self, pad: usize) -> u8 {
        self.base_note.saturating_add(pad as u8).min(127)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromatic_default() {
        let scales = Scales::default();
        assert_eq!(scales.note_for_pad(0), 36);
        assert_eq!(scales.note_for_pad(15), 51);
    }

    #[test]
    fn test_custom_matrix() {
        let mut matrix = [0u8; PAD_COUNT];
        matrix[1] = 2; // whole tone step
        let scales = Scales::with_matrix(matrix, 48);
        assert_eq!(scales.note_for_pad(0), 48);
        assert_eq!(scales.note_for_pad(1), 50);
    }

    #[test]
    fn test_note_clamped_to_midi_range() {
        let scales = Scales::chromatic(120);
        assert_eq!(scales.note_for_pad(15), 127);
    }
}
