use crate::calibrator::{CalibrationEvent, CalibrationState};
use crate::live::Detection;
use crate::reference::{ReferenceEntry, ReferenceTable};
use crate::types::{NoteMatch, SessionClock};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::io::{self, Stdout, Write};

#[derive(Serialize)]
struct DetectionLine<'a> {
    t_ms: u64,
    note: NoteMatch,
    frequencies: &'a [f64],
}

#[derive(Serialize)]
struct CalibrationLine<'a> {
    t_ms: u64,
    #[serde(flatten)]
    event: &'a CalibrationEvent,
}

#[derive(Serialize)]
struct TableLine<'a> {
    t_ms: u64,
    table: &'a [ReferenceEntry],
}

/// Prints note changes and calibration feedback, as text or JSON lines.
pub struct NoteDisplay<W: Write> {
    out: W,
    json: bool,
    clock: SessionClock,
    last_note: Option<NoteMatch>,
}

impl NoteDisplay<Stdout> {
    pub fn stdout(json: bool) -> Self {
        Self::new(io::stdout(), json)
    }
}

impl<W: Write> NoteDisplay<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            clock: SessionClock::new(),
            last_note: None,
        }
    }

    pub fn with_clock(mut self, clock: SessionClock) -> Self {
        self.clock = clock;
        self
    }

    /// Print `detection` if its note differs from the last one printed.
    /// Returns whether anything was written.
    pub fn show_detection(&mut self, detection: &Detection) -> io::Result<bool> {
        if self.last_note == Some(detection.note) {
            return Ok(false);
        }
        self.last_note = Some(detection.note);
        let t_ms = self.clock.now_ms();

        if self.json {
            self.write_json(&DetectionLine {
                t_ms,
                note: detection.note,
                frequencies: &detection.frequencies,
            })?;
        } else {
            writeln!(
                self.out,
                "[{:>8.2}s] {:<6} {}",
                t_ms as f64 / 1000.0,
                detection.note.label(),
                format_frequencies(&detection.frequencies)
            )?;
        }
        self.out.flush()?;
        Ok(true)
    }

    pub fn show_calibration(&mut self, event: &CalibrationEvent) -> io::Result<()> {
        if self.json {
            let t_ms = self.clock.now_ms();
            self.write_json(&CalibrationLine { t_ms, event })?;
            return self.out.flush();
        }

        match event {
            CalibrationEvent::State { state } => match state {
                CalibrationState::Recording(note) => {
                    writeln!(self.out, "── Play {} (press q + Enter to cancel)", note)?
                }
                CalibrationState::Done => writeln!(self.out, "Calibration complete!")?,
                CalibrationState::Cancelled => {
                    writeln!(self.out, "Calibration cancelled; default notes restored.")?
                }
                _ => {}
            },
            CalibrationEvent::Progress(p) => writeln!(
                self.out,
                "   Frequency: {:03}Hz (closest standard note {})",
                p.average_frequency, p.closest
            )?,
        }
        self.out.flush()
    }

    pub fn show_table(&mut self, table: &ReferenceTable) -> io::Result<()> {
        if self.json {
            let t_ms = self.clock.now_ms();
            self.write_json(&TableLine {
                t_ms,
                table: table.entries(),
            })?;
        } else {
            writeln!(self.out, "Reference table:")?;
            for entry in table.entries() {
                writeln!(
                    self.out,
                    "  {:<6} {}",
                    entry.note.name(),
                    format_frequencies(&entry.targets)
                )?;
            }
        }
        self.out.flush()
    }

    /// Drain calibration events until the sender side is dropped.
    pub fn run_calibration(&mut self, rx: Receiver<CalibrationEvent>) -> io::Result<()> {
        for event in rx.iter() {
            self.show_calibration(&event)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)
    }
}

fn format_frequencies(freqs: &[f64]) -> String {
    let parts: Vec<String> = freqs.iter().map(|f| format!("{:.1}", f)).collect();
    format!("[{}] Hz", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::CalibrationProgress;
    use crate::types::Note;

    fn detection(note: NoteMatch, freqs: &[f64]) -> Detection {
        Detection {
            note,
            frequencies: freqs.to_vec(),
            sample_rate: 44_100,
        }
    }

    fn lines(display: NoteDisplay<Vec<u8>>) -> Vec<String> {
        String::from_utf8(display.into_inner())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_prints_only_on_note_change() {
        let mut display = NoteDisplay::new(Vec::new(), false);
        let a = detection(NoteMatch::Note(Note::A), &[439.0]);
        assert!(display.show_detection(&a).unwrap());
        assert!(!display.show_detection(&a).unwrap());
        assert!(display
            .show_detection(&detection(NoteMatch::Rest, &[1.0]))
            .unwrap());
        assert!(display.show_detection(&a).unwrap());

        let out = lines(display);
        assert_eq!(out.len(), 3);
        assert!(out[0].contains("A ") && out[0].contains("[439.0] Hz"));
        assert!(out[1].contains("rest"));
    }

    #[test]
    fn test_json_detection_line() {
        let mut display = NoteDisplay::new(Vec::new(), true);
        display
            .show_detection(&detection(NoteMatch::Note(Note::ASharp), &[466.0, 467.0]))
            .unwrap();
        let out = lines(display);
        let v: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(v["note"], "A#/Bb");
        assert_eq!(v["frequencies"], serde_json::json!([466.0, 467.0]));
        assert!(v["t_ms"].is_u64());
    }

    #[test]
    fn test_json_calibration_event_is_flattened() {
        let mut display = NoteDisplay::new(Vec::new(), true);
        display
            .show_calibration(&CalibrationEvent::Progress(CalibrationProgress {
                note: Note::E,
                tick: 4,
                average_frequency: 330,
                closest: NoteMatch::Note(Note::E),
            }))
            .unwrap();
        let out = lines(display);
        let v: serde_json::Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(v["event"], "progress");
        assert_eq!(v["tick"], 4);
        assert_eq!(v["closest"], "E");
    }

    #[test]
    fn test_text_table_lists_every_note() {
        let mut display = NoteDisplay::new(Vec::new(), false);
        display.show_table(&ReferenceTable::default()).unwrap();
        let out = lines(display);
        assert_eq!(out.len(), 13);
        assert!(out[1].starts_with("  A "));
        assert!(out[1].contains("440.0"));
    }

    #[test]
    fn test_run_calibration_drains_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(CalibrationEvent::State {
            state: CalibrationState::Recording(Note::G),
        })
        .unwrap();
        tx.send(CalibrationEvent::State {
            state: CalibrationState::Done,
        })
        .unwrap();
        drop(tx);

        let mut display = NoteDisplay::new(Vec::new(), false);
        display.run_calibration(rx).unwrap();
        let out = lines(display);
        assert_eq!(out, vec!["── Play G (press q + Enter to cancel)", "Calibration complete!"]);
    }
}
