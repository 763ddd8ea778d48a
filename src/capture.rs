//! Capture buffer and the `stream()` call that refreshes it.

use crate::error::CaptureError;
use crate::types::{SampleBuffer, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE};
use crate::wav_source::WavRecorder;
use log::{info, trace, warn};
use std::sync::{Arc, RwLock};

/// Longest single capture window, in seconds.
pub const MAX_STREAM_SECS: f64 = 3600.0;

/// Anything that can deliver mono 16-bit audio in fixed-size chunks:
/// the microphone, a WAV file, or the tone simulator.
pub trait AudioSource: Send {
    /// Block until `chunk_size` samples are available and return them.
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError>;

    /// Rate the source actually delivers, which may differ from the
    /// configured one.
    fn sample_rate(&self) -> u32;

    /// Drop audio queued since the last read.
    fn discard_pending(&mut self) {}
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError> {
        (**self).read_chunk(chunk_size)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn discard_pending(&mut self) {
        (**self).discard_pending()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Requested rate in Hz; corrected to the source's actual rate on first capture.
    pub sample_rate: u32,
    /// Samples per device read.
    pub chunk_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Shared handle to the latest capture window.
///
/// One writer replaces the whole buffer; readers take an `Arc` snapshot and
/// may lag one refresh behind.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<RwLock<Option<Arc<SampleBuffer>>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, buffer: Arc<SampleBuffer>) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(buffer);
    }

    pub fn snapshot(&self) -> Option<Arc<SampleBuffer>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Owns an audio source and refreshes a `CaptureBuffer` from it.
///
/// `stream` takes `&mut self`, so at most one capture is in flight per source.
pub struct Capture<S> {
    source: S,
    chunk_size: usize,
    rate: u32,
    buffer: CaptureBuffer,
    recorder: Option<WavRecorder>,
}

impl<S: AudioSource> Capture<S> {
    pub fn new(source: S, config: CaptureConfig) -> Self {
        Self {
            source,
            chunk_size: config.chunk_size.max(1),
            rate: config.sample_rate,
            buffer: CaptureBuffer::new(),
            recorder: None,
        }
    }

    /// Also append every captured window to a WAV file.
    pub fn with_recorder(mut self, recorder: WavRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn buffer(&self) -> CaptureBuffer {
        self.buffer.clone()
    }

    /// Rate that the next `stream` call will size itself by.
    pub fn sample_rate(&self) -> u32 {
        self.rate
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Number of chunks that `duration_secs` of audio takes.
    ///
    /// Rejects negative, non-finite and longer-than-`MAX_STREAM_SECS` durations.
    pub fn chunks_for(&self, duration_secs: f64) -> Result<usize, CaptureError> {
        if !duration_secs.is_finite() || !(0.0..=MAX_STREAM_SECS).contains(&duration_secs) {
            return Err(CaptureError::InvalidDuration(duration_secs));
        }
        Ok((self.rate as f64 / self.chunk_size as f64 * duration_secs).round() as usize)
    }

    /// Capture about `duration_secs` of audio and replace the shared buffer.
    ///
    /// Blocks until every chunk has been read. The stored rate is the source's
    /// actual rate; if it differs from the requested one it is adopted for
    /// this and all later captures.
    pub fn stream(&mut self, duration_secs: f64) -> Result<Arc<SampleBuffer>, CaptureError> {
        let chunks = self.chunks_for(duration_secs)?;
        let mut samples = Vec::with_capacity(chunks.saturating_mul(self.chunk_size));
        for _ in 0..chunks {
            samples.extend(self.source.read_chunk(self.chunk_size)?);
        }

        let actual = self.source.sample_rate();
        if actual != self.rate {
            warn!(
                "Source delivers {} Hz, requested {} Hz; using {} Hz",
                actual, self.rate, actual
            );
            self.rate = actual;
        }

        let buffer = Arc::new(SampleBuffer::new(samples, self.rate)?);
        trace!("Captured {} samples at {} Hz", buffer.len(), buffer.sample_rate());

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.write_buffer(&buffer)?;
        }

        self.buffer.replace(Arc::clone(&buffer));
        Ok(buffer)
    }

    pub fn discard_pending(&mut self) {
        self.source.discard_pending();
    }

    /// Finish any attached recording and hand back the source.
    pub fn into_source(mut self) -> Result<S, CaptureError> {
        if let Some(recorder) = self.recorder.take() {
            let path = recorder.path().to_path_buf();
            recorder.finalize()?;
            info!("Recording finalized: {:?}", path);
        }
        Ok(self.source)
    }
}
