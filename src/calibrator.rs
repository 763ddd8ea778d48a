//! Per-note calibration driver.
//!
//! Walks the reference table in order. For each note it samples a fixed
//! number of ticks, counting the dominant frequencies seen, then replaces
//! that note's targets with the most frequent ones. A cancel at any tick (or
//! a capture failure) puts the whole table back to defaults.

use crate::calibration::OccurrenceHistogram;
use crate::capture::AudioSource;
use crate::clock::Ticker;
use crate::engine::PitchEngine;
use crate::error::PitchError;
use crate::reference::ReferenceTable;
use crate::types::{CancelToken, Note, NoteMatch, DEFAULT_STREAM_SECS};
use crossbeam_channel::Sender;
use log::{debug, info, trace, warn};
use serde::Serialize;

pub const TICKS_PER_NOTE: u32 = 40;
pub const TICK_HZ: u32 = 60;
/// How many ranked frequencies set the cutoff for a note's targets.
pub const TOP_OCCURRENCES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "note", rename_all = "snake_case")]
pub enum CalibrationState {
    Idle,
    Recording(Note),
    Aggregating(Note),
    NextNote,
    Done,
    Cancelled,
}

/// Feedback for one sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationProgress {
    pub note: Note,
    pub tick: u32,
    /// Mean of the tick's frequency set, rounded to whole Hz.
    pub average_frequency: i64,
    /// What the table as it stands right now would call this tick.
    pub closest: NoteMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CalibrationEvent {
    State { state: CalibrationState },
    Progress(CalibrationProgress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    Completed,
    Cancelled,
}

/// What calibration needs from the pipeline: one fresh frequency set per tick.
pub trait FrequencySampler {
    /// Capture `window_secs` of audio and return its dominant-frequency set.
    fn sample(&mut self, window_secs: f64) -> Result<Vec<f64>, PitchError>;

    /// Drop input queued since the last sample.
    fn discard_pending(&mut self) {}
}

impl<S: AudioSource> FrequencySampler for PitchEngine<S> {
    fn sample(&mut self, window_secs: f64) -> Result<Vec<f64>, PitchError> {
        self.stream(window_secs)?;
        self.get_dominant_frequencies()
    }

    fn discard_pending(&mut self) {
        self.capture_mut().discard_pending();
    }
}

pub struct Calibrator {
    cancel: CancelToken,
    progress: Option<Sender<CalibrationEvent>>,
    ticks_per_note: u32,
    tick_hz: u32,
    window_secs: f64,
    state: CalibrationState,
}

impl Calibrator {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
            ticks_per_note: TICKS_PER_NOTE,
            tick_hz: TICK_HZ,
            window_secs: DEFAULT_STREAM_SECS,
            state: CalibrationState::Idle,
        }
    }

    /// Publish state changes and per-tick progress. Events are dropped if the
    /// receiver falls behind; calibration never waits on the display.
    pub fn with_progress(mut self, tx: Sender<CalibrationEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_ticks(mut self, ticks_per_note: u32) -> Self {
        self.ticks_per_note = ticks_per_note;
        self
    }

    /// Tick clock rate; 0 runs ticks back to back.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_hz = hz;
        self
    }

    pub fn with_window(mut self, secs: f64) -> Self {
        self.window_secs = secs;
        self
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Calibrate every note in `table`, in table order.
    ///
    /// On `Cancelled` or on error the table is back at its defaults.
    pub fn run<P: FrequencySampler>(
        &mut self,
        sampler: &mut P,
        table: &mut ReferenceTable,
    ) -> Result<CalibrationOutcome, PitchError> {
        let result = self.run_notes(sampler, table);
        if let Err(e) = &result {
            warn!("Calibration failed ({}); restoring default table", e);
            table.reset();
            self.set_state(CalibrationState::Idle);
        }
        result
    }

    fn run_notes<P: FrequencySampler>(
        &mut self,
        sampler: &mut P,
        table: &mut ReferenceTable,
    ) -> Result<CalibrationOutcome, PitchError> {
        let notes: Vec<Note> = table.entries().iter().map(|e| e.note).collect();
        let mut ticker = Ticker::new(self.tick_hz);
        info!(
            "Calibration: {} notes, {} ticks each at {} Hz",
            notes.len(),
            self.ticks_per_note,
            self.tick_hz
        );

        for (i, &note) in notes.iter().enumerate() {
            // Audio queued during the previous note's aggregation is stale.
            sampler.discard_pending();
            self.set_state(CalibrationState::Recording(note));

            let mut histogram = OccurrenceHistogram::new();
            for tick in 1..=self.ticks_per_note {
                ticker.tick();
                if self.cancel.is_cancelled() {
                    return Ok(self.abort(table, note, tick));
                }

                let frequencies = sampler.sample(self.window_secs)?;
                // The capture blocks; a cancel that landed meanwhile still
                // belongs to this tick.
                if self.cancel.is_cancelled() {
                    return Ok(self.abort(table, note, tick));
                }
                histogram.record(&frequencies);
                self.report_tick(table, note, tick, &frequencies)?;
            }

            self.set_state(CalibrationState::Aggregating(note));
            let targets = histogram.top_targets(TOP_OCCURRENCES);
            if targets.is_empty() {
                warn!("{}: nothing above rest was heard; keeping previous targets", note);
            } else {
                info!("{} → {:?}", note, targets);
                table.set_targets(note, targets)?;
            }

            let next = if i + 1 < notes.len() {
                CalibrationState::NextNote
            } else {
                CalibrationState::Done
            };
            self.set_state(next);
        }

        self.set_state(CalibrationState::Idle);
        info!("Calibration complete");
        Ok(CalibrationOutcome::Completed)
    }

    fn abort(&mut self, table: &mut ReferenceTable, note: Note, tick: u32) -> CalibrationOutcome {
        info!("Calibration cancelled at {} tick {}", note, tick);
        table.reset();
        self.set_state(CalibrationState::Cancelled);
        CalibrationOutcome::Cancelled
    }

    fn report_tick(
        &self,
        table: &ReferenceTable,
        note: Note,
        tick: u32,
        frequencies: &[f64],
    ) -> Result<(), PitchError> {
        let closest = crate::matcher::get_note_from_frequency(table, frequencies)?;
        let average_frequency = if frequencies.is_empty() {
            0
        } else {
            (frequencies.iter().sum::<f64>() / frequencies.len() as f64).round() as i64
        };
        trace!(
            "{} tick {}: {:?} (avg {} Hz, closest {})",
            note,
            tick,
            frequencies,
            average_frequency,
            closest
        );
        self.publish(CalibrationEvent::Progress(CalibrationProgress {
            note,
            tick,
            average_frequency,
            closest,
        }));
        Ok(())
    }

    fn set_state(&mut self, state: CalibrationState) {
        debug!("Calibration state: {:?}", state);
        self.state = state;
        self.publish(CalibrationEvent::State { state });
    }

    fn publish(&self, event: CalibrationEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureConfig;
    use crate::error::CaptureError;
    use crate::simulator::{Segment, ToneSimulator};

    /// Delivers a tone and fires the cancel token after `cancel_after` reads.
    struct CancellingSource {
        inner: ToneSimulator,
        token: CancelToken,
        reads: usize,
        cancel_after: usize,
    }

    impl AudioSource for CancellingSource {
        fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError> {
            self.reads += 1;
            if self.reads == self.cancel_after {
                self.token.cancel();
            }
            self.inner.read_chunk(chunk_size)
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }
    }

    fn quick(cancel: CancelToken) -> Calibrator {
        Calibrator::new(cancel).with_ticks(3).with_tick_rate(0)
    }

    #[test]
    fn test_constant_tone_calibrates_every_note() {
        let mut engine = PitchEngine::new(ToneSimulator::constant(220.0, 44_100), CaptureConfig::default());
        let mut table = ReferenceTable::default();
        let mut cal = quick(CancelToken::new());

        assert_eq!(cal.run(&mut engine, &mut table).unwrap(), CalibrationOutcome::Completed);
        assert_eq!(cal.state(), CalibrationState::Idle);
        assert_eq!(table.len(), 12);
        for entry in table.entries() {
            assert!(!entry.targets.is_empty());
            assert!(
                entry.targets.iter().all(|&t| (214.0..=226.0).contains(&t)),
                "{}: {:?}",
                entry.note,
                entry.targets
            );
        }
        assert_ne!(table, ReferenceTable::default());
    }

    #[test]
    fn test_cancel_before_start_restores_defaults() {
        let token = CancelToken::new();
        token.cancel();
        let mut engine = PitchEngine::new(ToneSimulator::constant(220.0, 44_100), CaptureConfig::default());
        let mut table = ReferenceTable::default();
        table.set_targets(Note::A, vec![221.0]).unwrap();

        let mut cal = quick(token);
        assert_eq!(cal.run(&mut engine, &mut table).unwrap(), CalibrationOutcome::Cancelled);
        assert_eq!(cal.state(), CalibrationState::Cancelled);
        assert_eq!(table, ReferenceTable::default());
        // Nothing was captured.
        assert!(engine.buffer().snapshot().is_none());
    }

    #[test]
    fn test_cancel_mid_run_rolls_back_completed_notes() {
        let token = CancelToken::new();
        // 4 chunks per tick, 3 ticks per note: cancel during the second note.
        let source = CancellingSource {
            inner: ToneSimulator::constant(220.0, 44_100),
            token: token.clone(),
            reads: 0,
            cancel_after: 18,
        };
        let mut engine = PitchEngine::new(source, CaptureConfig::default());
        let mut table = ReferenceTable::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut cal = quick(token).with_progress(tx);

        assert_eq!(cal.run(&mut engine, &mut table).unwrap(), CalibrationOutcome::Cancelled);
        assert_eq!(table, ReferenceTable::default());

        let events: Vec<CalibrationEvent> = rx.try_iter().collect();
        assert!(events.contains(&CalibrationEvent::State {
            state: CalibrationState::Aggregating(Note::A)
        }));
        assert!(!events.contains(&CalibrationEvent::State {
            state: CalibrationState::Recording(Note::B)
        }));
        assert_eq!(
            events.last(),
            Some(&CalibrationEvent::State {
                state: CalibrationState::Cancelled
            })
        );
    }

    #[test]
    fn test_cancel_during_final_tick_rolls_back() {
        let token = CancelToken::new();
        // 12 notes x 3 ticks x 4 chunks = 144 reads; fire inside the very last tick.
        let source = CancellingSource {
            inner: ToneSimulator::constant(220.0, 44_100),
            token: token.clone(),
            reads: 0,
            cancel_after: 143,
        };
        let mut engine = PitchEngine::new(source, CaptureConfig::default());
        let mut table = ReferenceTable::default();
        let mut cal = quick(token);

        assert_eq!(cal.run(&mut engine, &mut table).unwrap(), CalibrationOutcome::Cancelled);
        assert_eq!(cal.state(), CalibrationState::Cancelled);
        assert_eq!(table, ReferenceTable::default());
        assert_eq!(engine.capture().source().reads, 144);
    }

    /// Hands out a fixed frequency set per tick, in order.
    struct ScriptedSampler {
        ticks: std::vec::IntoIter<Vec<f64>>,
    }

    impl FrequencySampler for ScriptedSampler {
        fn sample(&mut self, _window_secs: f64) -> Result<Vec<f64>, PitchError> {
            Ok(self.ticks.next().unwrap_or_else(|| vec![1.0]))
        }
    }

    #[test]
    fn test_forty_tick_window_keeps_top_three_counts() {
        let mut ticks = Vec::new();
        ticks.extend(std::iter::repeat(vec![441.2]).take(9));
        ticks.extend(std::iter::repeat(vec![439.0, 440.7]).take(7));
        ticks.extend(std::iter::repeat(vec![450.0]).take(6));
        ticks.extend(std::iter::repeat(vec![1.0]).take(18));
        assert_eq!(ticks.len(), TICKS_PER_NOTE as usize);

        let mut sampler = ScriptedSampler {
            ticks: ticks.into_iter(),
        };
        let mut table = ReferenceTable::from_entries(vec![(Note::A, vec![440.0])]).unwrap();
        let mut cal = Calibrator::new(CancelToken::new()).with_tick_rate(0);

        assert_eq!(cal.run(&mut sampler, &mut table).unwrap(), CalibrationOutcome::Completed);
        assert_eq!(table.targets(Note::A), Some(&[441.0, 439.0, 440.0][..]));
    }

    #[test]
    fn test_silence_keeps_existing_targets() {
        let sim = ToneSimulator::new(vec![Segment::Rest { samples: 4096 }], 44_100).looping(true);
        let mut engine = PitchEngine::new(sim, CaptureConfig::default());
        let mut table = ReferenceTable::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut cal = quick(CancelToken::new()).with_progress(tx);

        assert_eq!(cal.run(&mut engine, &mut table).unwrap(), CalibrationOutcome::Completed);
        assert_eq!(table, ReferenceTable::default());

        let progress: Vec<CalibrationProgress> = rx
            .try_iter()
            .filter_map(|e| match e {
                CalibrationEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 36);
        assert!(progress.iter().all(|p| p.closest == NoteMatch::Rest && p.average_frequency == 1));
    }

    #[test]
    fn test_capture_failure_rolls_back() {
        // Exactly enough audio for the first note's three ticks.
        let script = vec![Segment::Tone {
            freq: 220.0,
            amplitude: 0.5,
            samples: 3 * 4 * 1024,
        }];
        let mut engine = PitchEngine::new(ToneSimulator::new(script, 44_100), CaptureConfig::default());
        let mut table = ReferenceTable::default();
        let mut cal = quick(CancelToken::new());

        let err = cal.run(&mut engine, &mut table).unwrap_err();
        assert!(matches!(err, PitchError::Capture(CaptureError::Exhausted)));
        assert_eq!(table, ReferenceTable::default());
        assert_eq!(cal.state(), CalibrationState::Idle);
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_string(&CalibrationEvent::State {
            state: CalibrationState::Recording(Note::CSharp),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"state","state":{"state":"recording","note":"C#/Db"}}"#);
    }
}
