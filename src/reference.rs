//! Note → target-frequency reference table.

use crate::error::PitchError;
use crate::types::Note;
use serde::Serialize;

/// Canonical one-frequency-per-note defaults, in table order.
pub const DEFAULT_FREQUENCIES: [(Note, f64); 12] = [
    (Note::A, 440.0),
    (Note::ASharp, 466.0),
    (Note::B, 493.0),
    (Note::C, 523.0),
    (Note::CSharp, 554.0),
    (Note::D, 587.0),
    (Note::DSharp, 622.0),
    (Note::E, 659.0),
    (Note::F, 698.0),
    (Note::FSharp, 739.0),
    (Note::G, 783.0),
    (Note::GSharp, 830.0),
];

/// One table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceEntry {
    pub note: Note,
    pub targets: Vec<f64>,
}

/// Ordered note table. Row order is observable: the matcher breaks weight
/// ties in favor of the earliest row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceTable {
    entries: Vec<ReferenceEntry>,
}

impl ReferenceTable {
    /// A table with no rows. Matching against it fails with `NoReferenceData`.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build from explicit rows, in the given order.
    pub fn from_entries<I>(rows: I) -> Result<Self, PitchError>
    where
        I: IntoIterator<Item = (Note, Vec<f64>)>,
    {
        let mut entries = Vec::new();
        for (note, targets) in rows {
            if targets.is_empty() {
                return Err(PitchError::EmptyTargets(note));
            }
            entries.push(ReferenceEntry { note, targets });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn targets(&self, note: Note) -> Option<&[f64]> {
        self.entries
            .iter()
            .find(|e| e.note == note)
            .map(|e| e.targets.as_slice())
    }

    /// Replace one note's targets, keeping its position. A note not yet in the
    /// table is appended.
    pub fn set_targets(&mut self, note: Note, targets: Vec<f64>) -> Result<(), PitchError> {
        if targets.is_empty() {
            return Err(PitchError::EmptyTargets(note));
        }
        match self.entries.iter_mut().find(|e| e.note == note) {
            Some(entry) => entry.targets = targets,
            None => self.entries.push(ReferenceEntry { note, targets }),
        }
        Ok(())
    }

    /// Restore every row to its default.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_FREQUENCIES
                .iter()
                .map(|&(note, freq)| ReferenceEntry {
                    note,
                    targets: vec![freq],
                })
                .collect(),
        }
    }
}
