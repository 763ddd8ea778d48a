//! Signal framing and windowing: split a capture window into overlapping,
//! zero-padded frames and taper each one with a Hamming window.

use crate::types::SampleBuffer;

/// Frame length in seconds.
pub const FRAME_SECS: f64 = 0.025;
/// Hop between frame starts in seconds.
pub const STEP_SECS: f64 = 0.01;

/// Frame geometry for one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub frame_length: usize,
    pub frame_step: usize,
    pub frame_count: usize,
}

impl FrameLayout {
    pub fn for_signal(signal_length: usize, sample_rate: u32) -> Self {
        let frame_length = ((FRAME_SECS * sample_rate as f64).round() as usize).max(1);
        let frame_step = ((STEP_SECS * sample_rate as f64).round() as usize).max(1);

        // |len - frame_length| / step, rounded up; a signal exactly one frame
        // long would give zero, so clamp to one.
        let frame_count = signal_length
            .abs_diff(frame_length)
            .div_ceil(frame_step)
            .max(1);

        Self {
            frame_length,
            frame_step,
            frame_count,
        }
    }

    /// Length of the zero-extended signal that covers every frame.
    pub fn padded_length(&self) -> usize {
        self.frame_count * self.frame_step + self.frame_length
    }
}

/// Row-major frame matrix: `len()` rows of `frame_length()` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frames {
    data: Vec<f64>,
    frame_length: usize,
}

impl Frames {
    pub fn len(&self) -> usize {
        self.data.len() / self.frame_length
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.frame_length;
        &self.data[start..start + self.frame_length]
    }

    pub fn iter(&self) -> std::slice::Chunks<'_, f64> {
        self.data.chunks(self.frame_length)
    }

    /// Multiply every frame element-wise by `window`.
    pub fn apply_window(&mut self, window: &[f64]) {
        debug_assert_eq!(window.len(), self.frame_length);
        for frame in self.data.chunks_mut(self.frame_length) {
            for (sample, w) in frame.iter_mut().zip(window) {
                *sample *= w;
            }
        }
    }
}

/// Slice `buffer` into overlapping frames.
///
/// Frame *i* covers `[i*step, i*step + frame_length)` of the signal after it
/// has been zero-extended to `FrameLayout::padded_length`. Always yields at
/// least one frame, even for an empty buffer.
pub fn frame(buffer: &SampleBuffer) -> (Frames, usize) {
    let layout = FrameLayout::for_signal(buffer.len(), buffer.sample_rate());
    let samples = buffer.samples();

    let mut data = Vec::with_capacity(layout.frame_count * layout.frame_length);
    for i in 0..layout.frame_count {
        let start = i * layout.frame_step;
        for j in start..start + layout.frame_length {
            data.push(samples.get(j).map_or(0.0, |&s| s as f64));
        }
    }

    (
        Frames {
            data,
            frame_length: layout.frame_length,
        },
        layout.frame_length,
    )
}

/// Hamming window: `w(n) = 0.54 - 0.46 cos(2πn / (M - 1))`.
pub fn hamming_window(length: usize) -> Vec<f64> {
    if length == 1 {
        return vec![1.0];
    }
    let m_minus_1 = (length - 1) as f64;
    (0..length)
        .map(|n| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * n as f64 / m_minus_1).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_at_default_rate() {
        // 4 chunks of 1024 = one 0.1s capture at 44.1kHz
        let layout = FrameLayout::for_signal(4096, 44_100);
        assert_eq!(layout.frame_length, 1103);
        assert_eq!(layout.frame_step, 441);
        // ceil(2993 / 441) = 7
        assert_eq!(layout.frame_count, 7);
        assert_eq!(layout.padded_length(), 7 * 441 + 1103);
    }

    #[test]
    fn test_short_buffer_yields_zero_padded_frame() {
        let buf = SampleBuffer::new(vec![5; 100], 44_100).unwrap();
        let (frames, frame_length) = frame(&buf);
        assert!(frames.len() >= 1);
        assert_eq!(frame_length, 1103);
        let first = frames.row(0);
        assert!(first[..100].iter().all(|&s| s == 5.0));
        assert!(first[100..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_empty_and_exact_length_buffers_still_frame() {
        let empty = SampleBuffer::new(Vec::new(), 44_100).unwrap();
        assert!(frame(&empty).0.len() >= 1);

        let exact = SampleBuffer::new(vec![1; 1103], 44_100).unwrap();
        assert_eq!(frame(&exact).0.len(), 1);
    }

    #[test]
    fn test_frames_overlap_by_step() {
        let samples: Vec<i16> = (0..3000).map(|i| (i % 1000) as i16).collect();
        let buf = SampleBuffer::new(samples.clone(), 1000).unwrap();
        // 1kHz: length 25, step 10
        let (frames, len) = frame(&buf);
        assert_eq!(len, 25);
        assert_eq!(frames.row(1)[0], samples[10] as f64);
        assert_eq!(frames.row(2)[5], samples[25] as f64);
        assert_eq!(frames.iter().count(), frames.len());
    }

    #[test]
    fn test_hamming_endpoints_and_peak() {
        let w = hamming_window(11);
        assert!((w[0] - 0.08).abs() < 1e-12);
        assert!((w[10] - 0.08).abs() < 1e-12);
        assert!((w[5] - 1.0).abs() < 1e-12);
        assert_eq!(hamming_window(1), vec![1.0]);
    }

    #[test]
    fn test_apply_window_scales_rows() {
        let buf = SampleBuffer::new(vec![100; 2000], 1000).unwrap();
        let (mut frames, len) = frame(&buf);
        let w = hamming_window(len);
        frames.apply_window(&w);
        assert!((frames.row(0)[0] - 8.0).abs() < 1e-9);
        assert!((frames.row(0)[12] - 100.0).abs() < 1e-9);
    }
}
