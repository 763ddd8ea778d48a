//! Live performance mode: a background worker keeps the capture buffer fresh
//! while the foreground loop classifies whatever window is newest.

use crate::capture::{AudioSource, Capture, CaptureBuffer};
use crate::engine::PitchEngine;
use crate::error::{CaptureError, PitchError};
use crate::matcher;
use crate::reference::ReferenceTable;
use crate::spectrum::SpectralAnalyzer;
use crate::types::{NoteMatch, SampleBuffer};
use log::{error, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Classification of one capture window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub note: NoteMatch,
    pub frequencies: Vec<f64>,
    pub sample_rate: u32,
}

/// What the worker hands back when it exits.
type WorkerExit<S> = (Capture<S>, Result<(), CaptureError>);

/// Engine returned by `LiveSession::stop`, with the worker's error if it
/// ended on one (e.g. `Exhausted` when a file source runs out).
pub struct StoppedSession<S> {
    pub engine: PitchEngine<S>,
    pub worker_error: Option<CaptureError>,
}

/// Running live mode.
///
/// The capture side of the engine lives on the `capture` thread for as long
/// as the session runs, so nothing else can call `stream` concurrently. The
/// worker is always joined before the engine is handed back, and on drop.
pub struct LiveSession<S: AudioSource + 'static> {
    playing: Arc<AtomicBool>,
    worker: Option<JoinHandle<WorkerExit<S>>>,
    buffer: CaptureBuffer,
    analyzer: Option<SpectralAnalyzer>,
    last_buffer: Option<Arc<SampleBuffer>>,
    latest: Option<Detection>,
}

impl<S: AudioSource + 'static> LiveSession<S> {
    /// Start capturing `window_secs` windows back to back.
    pub fn start(engine: PitchEngine<S>, window_secs: f64) -> Result<Self, CaptureError> {
        let (mut capture, analyzer) = engine.into_parts();
        // Validate up front so a bad window fails here, not on the worker.
        capture.chunks_for(window_secs)?;

        let buffer = capture.buffer();
        let playing = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&playing);

        let worker = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                info!("Capture worker started ({:.3}s windows)", window_secs);
                let result = loop {
                    if let Err(e) = capture.stream(window_secs) {
                        break Err(e);
                    }
                    if !flag.load(Ordering::SeqCst) {
                        break Ok(());
                    }
                };
                match &result {
                    Ok(()) => info!("Capture worker stopped"),
                    Err(e) => error!("Capture worker ended: {}", e),
                }
                (capture, result)
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture worker: {e}")))?;

        Ok(Self {
            playing,
            worker: Some(worker),
            buffer,
            analyzer: Some(analyzer),
            last_buffer: None,
            latest: None,
        })
    }

    /// False once the worker has exited, whether stopped or on error.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Classify the newest capture window.
    ///
    /// Returns `None` when no window has arrived since the previous poll
    /// (including before the first one); `latest()` still holds the last result.
    pub fn poll(&mut self, table: &ReferenceTable) -> Result<Option<Detection>, PitchError> {
        let Some(buffer) = self.buffer.snapshot() else {
            return Ok(None);
        };
        if self
            .last_buffer
            .as_ref()
            .is_some_and(|prev| Arc::ptr_eq(prev, &buffer))
        {
            return Ok(None);
        }

        let analyzer = self.analyzer.get_or_insert_with(SpectralAnalyzer::new);
        let frequencies = analyzer.dominant_frequencies(&buffer)?;
        let note = matcher::get_note_from_frequency(table, &frequencies)?;
        let detection = Detection {
            note,
            frequencies,
            sample_rate: buffer.sample_rate(),
        };

        self.last_buffer = Some(buffer);
        self.latest = Some(detection.clone());
        Ok(Some(detection))
    }

    pub fn latest(&self) -> Option<&Detection> {
        self.latest.as_ref()
    }

    /// Clear the playing flag, join the worker, and return the engine.
    ///
    /// The worker finishes its in-flight capture before exiting, so this
    /// blocks for up to one window.
    pub fn stop(mut self) -> Result<StoppedSession<S>, CaptureError> {
        let (capture, result) = self.shutdown().ok_or(CaptureError::WorkerPanicked)??;
        let analyzer = self.analyzer.take().unwrap_or_default();
        Ok(StoppedSession {
            engine: PitchEngine::from_parts(capture, analyzer),
            worker_error: result.err(),
        })
    }

    fn shutdown(&mut self) -> Option<Result<WorkerExit<S>, CaptureError>> {
        self.playing.store(false, Ordering::SeqCst);
        let handle = self.worker.take()?;
        Some(handle.join().map_err(|_| CaptureError::WorkerPanicked))
    }
}

impl<S: AudioSource + 'static> Drop for LiveSession<S> {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.shutdown() {
            error!("Live session shutdown: {}", e);
        }
    }
}
