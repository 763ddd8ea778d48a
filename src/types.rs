use crate::error::CaptureError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

// ─── Constants ──────────────────────────────────────────────────────────────

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Capture window used by both live mode and calibration ticks.
pub const DEFAULT_STREAM_SECS: f64 = 0.1;

/// Dominant-frequency value produced by silent/noise frames (bin 0 → 0//2 + 1).
pub const REST_FREQUENCY: f64 = 1.0;

// ─── Audio data ─────────────────────────────────────────────────────────────

/// One capture window of mono 16-bit audio.
///
/// Built once per `stream()` call and shared behind an `Arc`; never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Result<Self, CaptureError> {
        if sample_rate == 0 {
            return Err(CaptureError::InvalidSampleRate);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ─── Notes ──────────────────────────────────────────────────────────────────

/// The twelve chromatic note classes, in reference-table order (starting at A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Note {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#/Bb")]
    ASharp,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#/Db")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#/Eb")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#/Gb")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#/Ab")]
    GSharp,
}

impl Note {
    pub const ALL: [Note; 12] = [
        Note::A,
        Note::ASharp,
        Note::B,
        Note::C,
        Note::CSharp,
        Note::D,
        Note::DSharp,
        Note::E,
        Note::F,
        Note::FSharp,
        Note::G,
        Note::GSharp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Note::A => "A",
            Note::ASharp => "A#/Bb",
            Note::B => "B",
            Note::C => "C",
            Note::CSharp => "C#/Db",
            Note::D => "D",
            Note::DSharp => "D#/Eb",
            Note::E => "E",
            Note::F => "F",
            Note::FSharp => "F#/Gb",
            Note::G => "G",
            Note::GSharp => "G#/Ab",
        }
    }

    /// Individual spellings, e.g. `A#/Bb` → `A#`, `Bb`.
    pub fn spellings(self) -> impl Iterator<Item = &'static str> {
        self.name().split('/')
    }

    /// Accepts either the full table name (`"C#/Db"`) or one spelling (`"Db"`).
    pub fn from_name(name: &str) -> Option<Note> {
        Note::ALL
            .into_iter()
            .find(|n| n.name() == name || n.spellings().any(|s| s == name))
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of classifying one frequency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMatch {
    /// Silence or background noise (the `1.0` sentinel was present).
    Rest,
    Note(Note),
}

impl NoteMatch {
    pub fn label(&self) -> &'static str {
        match self {
            NoteMatch::Rest => "rest",
            NoteMatch::Note(n) => n.name(),
        }
    }

    pub fn note(&self) -> Option<Note> {
        match self {
            NoteMatch::Rest => None,
            NoteMatch::Note(n) => Some(*n),
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, NoteMatch::Rest)
    }

    /// True when `spelling` (e.g. `"Bb"` from a score) names the matched note.
    pub fn satisfies(&self, spelling: &str) -> bool {
        match self {
            NoteMatch::Rest => spelling == "rest",
            NoteMatch::Note(n) => n.spellings().any(|s| s == spelling),
        }
    }
}

impl fmt::Display for NoteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for NoteMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

// ─── Cancellation ───────────────────────────────────────────────────────────

/// Shared abort flag. Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
