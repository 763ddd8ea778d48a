use crate::capture::{AudioSource, Capture, CaptureBuffer, CaptureConfig};
use crate::error::{CaptureError, PitchError};
use crate::matcher;
use crate::reference::ReferenceTable;
use crate::spectrum::SpectralAnalyzer;
use crate::types::NoteMatch;

/// Capture plus analysis behind the three calls the game loop uses:
/// `stream`, `get_dominant_frequencies` and `get_note_from_frequency`.
pub struct PitchEngine<S> {
    capture: Capture<S>,
    analyzer: SpectralAnalyzer,
}

impl<S: AudioSource> PitchEngine<S> {
    pub fn new(source: S, config: CaptureConfig) -> Self {
        Self::from_capture(Capture::new(source, config))
    }

    pub fn from_capture(capture: Capture<S>) -> Self {
        Self::from_parts(capture, SpectralAnalyzer::new())
    }

    pub(crate) fn from_parts(capture: Capture<S>, analyzer: SpectralAnalyzer) -> Self {
        Self { capture, analyzer }
    }

    pub(crate) fn into_parts(self) -> (Capture<S>, SpectralAnalyzer) {
        (self.capture, self.analyzer)
    }

    /// Refresh the sample buffer with about `duration_secs` of audio.
    pub fn stream(&mut self, duration_secs: f64) -> Result<(), CaptureError> {
        self.capture.stream(duration_secs).map(|_| ())
    }

    /// Dominant-frequency set of the current buffer.
    ///
    /// Fails with `BufferNotPopulated` until the first `stream` call.
    pub fn get_dominant_frequencies(&mut self) -> Result<Vec<f64>, PitchError> {
        let buffer = self
            .capture
            .buffer()
            .snapshot()
            .ok_or(PitchError::BufferNotPopulated)?;
        self.analyzer.dominant_frequencies(&buffer)
    }

    pub fn get_note_from_frequency(
        &self,
        table: &ReferenceTable,
        frequencies: &[f64],
    ) -> Result<NoteMatch, PitchError> {
        matcher::get_note_from_frequency(table, frequencies)
    }

    /// Capture one window and classify it.
    pub fn detect(&mut self, table: &ReferenceTable, duration_secs: f64) -> Result<NoteMatch, PitchError> {
        self.stream(duration_secs)?;
        let frequencies = self.get_dominant_frequencies()?;
        matcher::get_note_from_frequency(table, &frequencies)
    }

    pub fn buffer(&self) -> CaptureBuffer {
        self.capture.buffer()
    }

    pub fn capture(&self) -> &Capture<S> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut Capture<S> {
        &mut self.capture
    }

    pub fn into_capture(self) -> Capture<S> {
        self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Segment, ToneSimulator};
    use crate::types::Note;

    #[test]
    fn test_frequencies_before_stream_is_precondition_error() {
        let mut engine = PitchEngine::new(ToneSimulator::constant(440.0, 44_100), CaptureConfig::default());
        let err = engine.get_dominant_frequencies().unwrap_err();
        assert!(matches!(err, PitchError::BufferNotPopulated));
        assert!(err.to_string().contains("SampleBuffer"));
    }

    #[test]
    fn test_detect_default_a() {
        let mut engine = PitchEngine::new(ToneSimulator::constant(440.0, 44_100), CaptureConfig::default());
        let table = ReferenceTable::default();
        assert_eq!(engine.detect(&table, 0.1).unwrap(), NoteMatch::Note(Note::A));
    }

    #[test]
    fn test_detect_silence_is_rest() {
        let sim = ToneSimulator::new(vec![Segment::Rest { samples: 44_100 }], 44_100);
        let mut engine = PitchEngine::new(sim, CaptureConfig::default());
        let table = ReferenceTable::default();
        assert_eq!(engine.detect(&table, 0.1).unwrap(), NoteMatch::Rest);
    }

    #[test]
    fn test_repeat_calls_on_same_buffer_agree() {
        let mut engine = PitchEngine::new(ToneSimulator::constant(587.0, 44_100), CaptureConfig::default());
        engine.stream(0.1).unwrap();
        let a = engine.get_dominant_frequencies().unwrap();
        let b = engine.get_dominant_frequencies().unwrap();
        assert_eq!(a, b);
        let table = ReferenceTable::default();
        assert_eq!(
            engine.get_note_from_frequency(&table, &a).unwrap(),
            NoteMatch::Note(Note::D)
        );
    }
}
