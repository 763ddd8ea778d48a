//! Error types for capture and analysis.

use crate::types::Note;
use std::time::Duration;
use thiserror::Error;

/// Failures while acquiring audio.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No input device on the default host. Fatal at startup.
    #[error("no audio input device available")]
    NoInputDevice,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("no audio received for {0:?}")]
    Timeout(Duration),

    #[error("audio source disconnected")]
    Disconnected,

    /// A finite source (WAV file, scripted simulator) has no more audio.
    #[error("audio source exhausted")]
    Exhausted,

    #[error("invalid capture duration {0}s")]
    InvalidDuration(f64),

    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("capture worker panicked")]
    WorkerPanicked,
}

/// Failures in frequency extraction and note matching.
#[derive(Debug, Error)]
pub enum PitchError {
    #[error("capture buffer must hold a SampleBuffer, found none; call stream() first")]
    BufferNotPopulated,

    #[error("reference table has no entries")]
    NoReferenceData,

    #[error("note {0} needs at least one target frequency")]
    EmptyTargets(Note),

    #[error("frequency transform failed: {0}")]
    Transform(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}
