use crate::capture::AudioSource;
use crate::error::CaptureError;
use crate::reference::DEFAULT_FREQUENCIES;
use log::info;
use std::thread;
use std::time::{Duration, Instant};

/// One step of a simulated performance.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Sine tone at `freq` Hz for `samples` samples.
    Tone { freq: f64, amplitude: f64, samples: usize },
    /// Digital silence.
    Rest { samples: usize },
}

impl Segment {
    fn len(&self) -> usize {
        match self {
            Segment::Tone { samples, .. } | Segment::Rest { samples } => *samples,
        }
    }
}

/// Synthetic audio source that plays a scripted sequence of tones and rests.
///
/// Exercises the full detection pipeline without a microphone. Output is
/// phase-continuous across chunk boundaries because phase is derived from a
/// monotonic sample counter.
pub struct ToneSimulator {
    script: Vec<Segment>,
    sample_rate: u32,
    segment: usize,
    offset: usize,
    sample_counter: u64,
    looping: bool,
    realtime: bool,
    started: Option<Instant>,
}

impl ToneSimulator {
    pub fn new(script: Vec<Segment>, sample_rate: u32) -> Self {
        Self {
            script,
            sample_rate,
            segment: 0,
            offset: 0,
            sample_counter: 0,
            looping: false,
            realtime: false,
            started: None,
        }
    }

    /// Restart the script when it ends instead of reporting `Exhausted`.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Pace chunk delivery to wall-clock time, like a live device.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// A single tone forever.
    pub fn constant(freq: f64, sample_rate: u32) -> Self {
        let tone = Segment::Tone {
            freq,
            amplitude: 0.5,
            samples: sample_rate as usize,
        };
        Self::new(vec![tone], sample_rate).looping(true)
    }

    pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
        (sample_rate as u64 * ms as u64 / 1000) as usize
    }

    fn next_sample(&mut self) -> Option<i16> {
        while self.segment < self.script.len() && self.offset >= self.script[self.segment].len() {
            self.segment += 1;
            self.offset = 0;
        }
        if self.segment >= self.script.len() {
            return None;
        }

        let value = match &self.script[self.segment] {
            Segment::Tone { freq, amplitude, .. } => {
                let t = self.sample_counter as f64 / self.sample_rate as f64;
                let s = amplitude * (2.0 * std::f64::consts::PI * freq * t).sin();
                (s * i16::MAX as f64) as i16
            }
            Segment::Rest { .. } => 0,
        };
        self.offset += 1;
        self.sample_counter += 1;
        Some(value)
    }
}

impl AudioSource for ToneSimulator {
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError> {
        let mut chunk = Vec::with_capacity(chunk_size);
        while chunk.len() < chunk_size {
            match self.next_sample() {
                Some(s) => chunk.push(s),
                None if self.looping && self.script.iter().any(|s| s.len() > 0) => {
                    self.segment = 0;
                    self.offset = 0;
                }
                None if chunk.is_empty() => return Err(CaptureError::Exhausted),
                None => chunk.push(0),
            }
        }

        if self.realtime {
            let start = *self.started.get_or_insert_with(Instant::now);
            let target = Duration::from_secs_f64(self.sample_counter as f64 / self.sample_rate as f64);
            let elapsed = start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Walks the default scale, one note per `note_ms`, with short rests between.
pub fn demo_script(sample_rate: u32, note_ms: u32) -> Vec<Segment> {
    info!("Simulator: default-table scale, {}ms per note", note_ms);
    let note = ToneSimulator::ms_to_samples(note_ms, sample_rate);
    let gap = ToneSimulator::ms_to_samples(note_ms / 4, sample_rate);
    let mut script = Vec::new();
    for &(_, freq) in DEFAULT_FREQUENCIES.iter() {
        script.push(Segment::Tone {
            freq,
            amplitude: 0.5,
            samples: note,
        });
        script.push(Segment::Rest { samples: gap });
    }
    script
}

/// One tone per table note, each lasting `samples_per_note`, sung slightly
/// flat an octave down so calibration visibly moves the targets.
pub fn calibration_script(sample_rate: u32, samples_per_note: usize) -> Vec<Segment> {
    info!(
        "Simulator: calibration sweep, {:.2}s per note",
        samples_per_note as f64 / sample_rate as f64
    );
    DEFAULT_FREQUENCIES
        .iter()
        .map(|&(_, freq)| Segment::Tone {
            freq: freq * 0.49,
            amplitude: 0.5,
            samples: samples_per_note,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_then_rest_then_exhausted() {
        let script = vec![
            Segment::Tone {
                freq: 440.0,
                amplitude: 0.5,
                samples: 6,
            },
            Segment::Rest { samples: 2 },
        ];
        let mut sim = ToneSimulator::new(script, 44_100);
        let first = sim.read_chunk(6).unwrap();
        assert_eq!(first[0], 0);
        assert!(first[1..].iter().any(|&s| s != 0));
        // Rest (2 samples) then zero padding past the end
        assert_eq!(sim.read_chunk(4).unwrap(), vec![0, 0, 0, 0]);
        assert!(matches!(sim.read_chunk(4), Err(CaptureError::Exhausted)));
    }

    #[test]
    fn test_looping_never_exhausts() {
        let mut sim = ToneSimulator::new(vec![Segment::Rest { samples: 3 }], 8_000).looping(true);
        for _ in 0..10 {
            assert_eq!(sim.read_chunk(5).unwrap().len(), 5);
        }
    }

    #[test]
    fn test_phase_continuous_across_chunks() {
        let mut a = ToneSimulator::constant(440.0, 44_100);
        let mut b = ToneSimulator::constant(440.0, 44_100);
        let whole = a.read_chunk(2048).unwrap();
        let mut split = b.read_chunk(1000).unwrap();
        split.extend(b.read_chunk(1048).unwrap());
        assert_eq!(whole, split);
    }

    #[test]
    fn test_demo_script_covers_every_note() {
        let script = demo_script(44_100, 400);
        let tones = script
            .iter()
            .filter(|s| matches!(s, Segment::Tone { .. }))
            .count();
        assert_eq!(tones, 12);
    }
}
