use crate::capture::AudioSource;
use crate::error::CaptureError;
use crate::types::SampleBuffer;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Streams a WAV file as an `AudioSource`.
///
/// The whole file is decoded up front to mono i16. With real-time pacing on,
/// each chunk is handed out no earlier than its position in the file, so the
/// file behaves like a microphone; otherwise chunks are returned immediately.
/// The file's own rate is reported as the source rate.
///
/// Typical use: `--audio-file my_playing.wav`
pub struct WavSource {
    path: PathBuf,
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    realtime: bool,
    started: Option<Instant>,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>, realtime: bool) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        info!(
            "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
            path.file_name().unwrap_or_default(),
            spec.sample_rate,
            channels,
            spec.sample_format,
            spec.bits_per_sample,
        );

        // A sample that fails to decode (truncated or corrupt data) fails the open.
        let interleaved: Vec<i32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i32))
                .collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let bits = spec.bits_per_sample as i32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| rescale_to_16(s, bits)))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples: Vec<i16> = interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().sum::<i32>() / frame.len() as i32) as i16)
            .collect();

        let duration_secs = samples.len() as f64 / spec.sample_rate.max(1) as f64;
        info!("WAV: {:.2}s, {} samples", duration_secs, samples.len());

        if spec.sample_rate == 0 {
            return Err(CaptureError::InvalidSampleRate);
        }

        Ok(Self {
            path,
            samples,
            position: 0,
            sample_rate: spec.sample_rate,
            realtime,
            started: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.position)
    }

    fn position_at(&self, elapsed: Duration) -> usize {
        (elapsed.as_secs_f64() * self.sample_rate as f64) as usize
    }
}

impl AudioSource for WavSource {
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError> {
        if self.position >= self.samples.len() {
            return Err(CaptureError::Exhausted);
        }

        let end = (self.position + chunk_size).min(self.samples.len());
        let mut chunk = self.samples[self.position..end].to_vec();
        chunk.resize(chunk_size, 0);
        self.position = end;

        if self.realtime {
            // Pace to real time: wait until the chunk's last sample has "played".
            let start = *self.started.get_or_insert_with(Instant::now);
            let target = Duration::from_secs_f64(end as f64 / self.sample_rate as f64);
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

    /// In real-time mode, skip audio that "played" while nobody was reading.
    fn discard_pending(&mut self) {
        if let Some(start) = self.started {
            let now = self.position_at(start.elapsed()).min(self.samples.len());
            if now > self.position {
                self.position = now;
            }
        }
    }
}

/// Rescale an integer PCM sample of `bits` width to the i16 range.
fn rescale_to_16(sample: i32, bits: i32) -> i32 {
    if bits > 16 {
        sample >> (bits - 16)
    } else if bits < 16 {
        sample << (16 - bits)
    } else {
        sample
    }
}

/// Appends capture windows to a 16-bit mono WAV file.
///
/// The file is created on the first window so that its header carries the
/// rate actually captured.
pub struct WavRecorder {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
}

impl WavRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            sample_rate: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_buffer(&mut self, buffer: &SampleBuffer) -> Result<(), CaptureError> {
        if self.writer.is_none() {
            let spec = WavSpec {
                channels: 1,
                sample_rate: buffer.sample_rate(),
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            self.writer = Some(WavWriter::create(&self.path, spec)?);
            self.sample_rate = buffer.sample_rate();
            info!("Recording captures → {:?}", self.path);
        } else if buffer.sample_rate() != self.sample_rate {
            warn!(
                "Capture rate changed {} → {} Hz; recording keeps {} Hz header",
                self.sample_rate,
                buffer.sample_rate(),
                self.sample_rate
            );
        }

        if let Some(writer) = self.writer.as_mut() {
            for &s in buffer.samples() {
                writer.write_sample(s)?;
            }
        }
        Ok(())
    }

    pub fn finalize(mut self) -> Result<(), CaptureError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pitch_capture_{}_{}.wav", name, std::process::id()))
    }

    fn write_wav(path: &Path, spec: WavSpec, samples: &[i32]) {
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_rescale_to_16() {
        assert_eq!(rescale_to_16(0x7F_FFFF, 24), 0x7FFF);
        assert_eq!(rescale_to_16(127, 8), 127 << 8);
        assert_eq!(rescale_to_16(-1234, 16), -1234);
    }

    #[test]
    fn test_stereo_file_mixed_to_mono_and_padded() {
        let path = temp_wav("stereo");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        // 3 stereo frames: (100, 300), (-50, -150), (0, 10)
        write_wav(&path, spec, &[100, 300, -50, -150, 0, 10]);

        let mut source = WavSource::open(&path, false).unwrap();
        assert_eq!(source.sample_rate(), 22_050);
        assert_eq!(source.remaining(), 3);
        let chunk = source.read_chunk(4).unwrap();
        assert_eq!(chunk, vec![200, -100, 5, 0]);
        assert!(matches!(source.read_chunk(4), Err(CaptureError::Exhausted)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let path = temp_wav("truncated");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, &[10; 64]);
        // Cut one and a half samples off the data chunk; the header still claims 64.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(WavSource::open(&path, false), Err(CaptureError::Wav(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_recorder_writes_readable_file() {
        let path = temp_wav("recorder");
        let mut recorder = WavRecorder::new(&path);
        let buf = SampleBuffer::new(vec![1, -2, 3, -4], 16_000).unwrap();
        recorder.write_buffer(&buf).unwrap();
        recorder.write_buffer(&buf).unwrap();
        recorder.finalize().unwrap();

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -2, 3, -4, 1, -2, 3, -4]);

        let _ = std::fs::remove_file(&path);
    }
}
