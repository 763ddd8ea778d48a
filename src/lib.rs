pub mod calibration;
pub mod calibrator;
pub mod capture;
pub mod clock;
pub mod console_display;
pub mod engine;
pub mod error;
pub mod framing;
pub mod live;
pub mod matcher;
pub mod reference;
pub mod simulator;
pub mod spectrum;
pub mod types;
pub mod wav_source;

#[cfg(feature = "audio")]
pub mod audio_input;

pub use capture::{AudioSource, CaptureBuffer, CaptureConfig};
pub use engine::PitchEngine;
pub use error::{CaptureError, PitchError};
pub use reference::ReferenceTable;
pub use types::{CancelToken, Note, NoteMatch, SampleBuffer};
