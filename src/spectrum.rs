//! Spectral analysis: one dominant frequency per frame, aggregated into the
//! sorted frequency set for a capture window.

use crate::error::PitchError;
use crate::framing::{self, hamming_window};
use crate::types::SampleBuffer;
use log::trace;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Transform size. Frames are zero-padded (or cropped) to this length.
pub const FFT_SIZE: usize = 16_384;

/// Per-frame dominant-frequency extractor.
///
/// Owns the FFT plan and every working buffer, so repeated calls on a stable
/// rate and frame length allocate no FFT state. Analysis takes `&mut self`,
/// so each thread that analyzes audio holds its own analyzer.
pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    window: Vec<f64>,
    labels: Vec<f64>,
    labels_rate: u32,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        Self {
            fft,
            input,
            spectrum,
            scratch,
            window: Vec::new(),
            labels: Vec::new(),
            labels_rate: 0,
        }
    }

    /// Frame, window and analyze `buffer`, returning its dominant-frequency set.
    pub fn dominant_frequencies(&mut self, buffer: &SampleBuffer) -> Result<Vec<f64>, PitchError> {
        let (mut frames, frame_length) = framing::frame(buffer);
        if self.window.len() != frame_length {
            self.window = hamming_window(frame_length);
        }
        frames.apply_window(&self.window);

        let mut per_frame = Vec::with_capacity(frames.len());
        for frame in frames.iter() {
            per_frame.push(self.dominant_frequency(frame, buffer.sample_rate())?);
        }
        trace!("{} frames → {:?}", per_frame.len(), per_frame);

        Ok(aggregate(per_frame))
    }

    /// Mapped frequency at the bin of maximum power for one (windowed) frame.
    pub fn dominant_frequency(&mut self, frame: &[f64], sample_rate: u32) -> Result<f64, PitchError> {
        if self.labels_rate != sample_rate {
            self.labels = bin_labels(sample_rate);
            self.labels_rate = sample_rate;
        }

        let n = frame.len().min(FFT_SIZE);
        self.input[..n].copy_from_slice(&frame[..n]);
        self.input[n..].fill(0.0);

        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| PitchError::Transform(e.to_string()))?;

        let scale = 1.0 / FFT_SIZE as f64;
        let mut best_index = 0;
        let mut best_power = f64::NEG_INFINITY;
        for (i, c) in self.spectrum.iter().take(self.labels.len()).enumerate() {
            let magnitude = scale * c.norm();
            let power = scale * scale * magnitude * magnitude;
            // Strict comparison: the first of equal maxima wins.
            if power > best_power {
                best_power = power;
                best_index = i;
            }
        }

        Ok(self.labels[best_index])
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mapped frequency labels for the retained (non-negative) bins.
///
/// Labels come from the standard bin-frequency relation evaluated over the
/// `FFT_SIZE/2 + 1` power bins, keeping the non-negative half, and each is
/// mapped through `floor(label / 2) + 1`. Calibration and live matching both
/// depend on exactly this mapping.
pub fn bin_labels(sample_rate: u32) -> Vec<f64> {
    let bins = FFT_SIZE / 2 + 1;
    let non_negative = (bins - 1) / 2 + 1;
    let rate = sample_rate as f64;
    (0..non_negative)
        .map(|k| {
            let label = k as f64 * rate / bins as f64;
            (label / 2.0).floor() + 1.0
        })
        .collect()
}

/// Round to 3 decimals, dedup, and sort ascending.
pub fn aggregate<I: IntoIterator<Item = f64>>(frequencies: I) -> Vec<f64> {
    let mut out: Vec<f64> = frequencies
        .into_iter()
        .map(|f| (f * 1000.0).round() / 1000.0)
        .collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out.dedup();
    out
}
