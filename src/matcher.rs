//! Octave-aware note matching.
//!
//! The distance `|100 · sin((π/ln2) · ln(f/t))|` is zero whenever `f/t` is a
//! power of two, so a detection an octave off still lands on the right note,
//! while frequencies between octaves of the target are penalized.

use crate::error::PitchError;
use crate::reference::ReferenceTable;
use crate::types::{Note, NoteMatch, REST_FREQUENCY};
use log::debug;
use std::f64::consts::{LN_2, PI};

/// Weight credited for an exact octave-aligned hit.
pub const EXACT_MATCH_BONUS: f64 = -100.0;

/// Octave-wrap distance between a detected frequency and a target, in 0..=100.
pub fn octave_distance(frequency: f64, target: f64) -> f64 {
    let phase = (PI / LN_2) * (frequency / target).ln();
    (100.0 * round4(phase.sin())).abs()
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Total weight of every table row against `frequencies`, in table order.
/// Lower is a better match.
pub fn note_weights(table: &ReferenceTable, frequencies: &[f64]) -> Vec<(Note, f64)> {
    table
        .entries()
        .iter()
        .map(|entry| {
            let weight = frequencies
                .iter()
                .map(|&f| {
                    let nearest = entry
                        .targets
                        .iter()
                        .map(|&t| octave_distance(f, t))
                        .fold(f64::INFINITY, f64::min);
                    if nearest == 0.0 {
                        EXACT_MATCH_BONUS
                    } else {
                        nearest
                    }
                })
                .sum();
            (entry.note, weight)
        })
        .collect()
}

/// Classify a dominant-frequency set as a note or a rest.
///
/// Any `1.0` sentinel means rest, regardless of the other entries. Otherwise
/// the row with the smallest weight wins, the earliest row on ties. An empty
/// frequency set scores every row 0 and so returns the first row.
pub fn get_note_from_frequency(
    table: &ReferenceTable,
    frequencies: &[f64],
) -> Result<NoteMatch, PitchError> {
    if frequencies.contains(&REST_FREQUENCY) {
        return Ok(NoteMatch::Rest);
    }
    if table.is_empty() {
        return Err(PitchError::NoReferenceData);
    }
    if frequencies.is_empty() {
        debug!("Empty frequency set; first table row wins by tie-break");
    }

    let mut best: Option<(Note, f64)> = None;
    for (note, weight) in note_weights(table, frequencies) {
        match best {
            Some((_, w)) if weight >= w => {}
            _ => best = Some((note, weight)),
        }
    }
    debug!("Weights → best {:?}", best);

    best.map(|(note, _)| NoteMatch::Note(note))
        .ok_or(PitchError::NoReferenceData)
}
