//! Occurrence counting for one note's calibration window.

use crate::types::REST_FREQUENCY;
use std::collections::BTreeMap;

/// Integer frequency → number of ticks it was seen in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccurrenceHistogram {
    counts: BTreeMap<u32, u32>,
}

impl OccurrenceHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every frequency above the rest sentinel, truncated to whole Hz.
    pub fn record(&mut self, frequencies: &[f64]) {
        for &f in frequencies {
            if f > REST_FREQUENCY && f.is_finite() {
                *self.counts.entry(f.trunc() as u32).or_insert(0) += 1;
            }
        }
    }

    pub fn count(&self, frequency: u32) -> u32 {
        self.counts.get(&frequency).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Most frequently seen frequencies.
    ///
    /// Frequencies are ranked by count and the count of the `rank`-th one sets
    /// the cutoff; every frequency at or above it is returned, so ties at the
    /// cutoff can push the list past `rank` entries. Ordered by descending
    /// count, then ascending frequency.
    pub fn top_targets(&self, rank: usize) -> Vec<f64> {
        if rank == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<(u32, u32)> = self.counts.iter().map(|(&f, &c)| (f, c)).collect();
        // Stable sort keeps ascending frequency within a count.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let Some(&(_, cutoff)) = ranked.get(rank - 1).or(ranked.last()) else {
            return Vec::new();
        };
        ranked
            .into_iter()
            .take_while(|&(_, c)| c >= cutoff)
            .map(|(f, _)| f as f64)
            .collect()
    }
}
