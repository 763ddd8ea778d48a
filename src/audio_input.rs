use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::{AudioSource, CaptureConfig};
use crate::error::CaptureError;

/// A read waiting longer than this reports `CaptureError::Timeout`.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Live microphone input via cpal.
///
/// The cpal `Stream` lives on its own `audio-input` thread (it is not `Send`
/// on every host). The device callback mixes to mono i16 and forwards
/// each callback buffer over a bounded channel; `read_chunk` reassembles
/// them into fixed-size chunks. Drop this to stop capture.
pub struct MicSource {
    rx: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    sample_rate: u32,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicSource {
    /// Open the default input device and start streaming.
    ///
    /// Fails with `NoInputDevice` when the host has no input device.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let requested = config.sample_rate;
        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<i16>>(64);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32, CaptureError>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let thread = thread::Builder::new()
            .name("audio-input".into())
            .spawn(move || {
                let stream = match build_stream(requested, raw_tx) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the MicSource drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!("Audio input closed");
            })
            .map_err(|e| CaptureError::Device(format!("failed to spawn audio thread: {e}")))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| CaptureError::Device("audio thread exited during setup".into()))??;

        Ok(Self {
            rx: raw_rx,
            pending: Vec::with_capacity(config.chunk_size * 4),
            sample_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSource for MicSource {
    fn read_chunk(&mut self, chunk_size: usize) -> Result<Vec<i16>, CaptureError> {
        while self.pending.len() < chunk_size {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Timeout(READ_TIMEOUT)),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }
        Ok(self.pending.drain(..chunk_size).collect())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Audio input thread panicked");
            }
        }
    }
}

// ─── Device setup ────────────────────────────────────────────────────────────

fn build_stream(requested: u32, tx: Sender<Vec<i16>>) -> Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoInputDevice)?;

    info!(
        "Audio input: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let (config, format) = choose_config(&device, requested)?;
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    if sample_rate != requested {
        warn!("Device does not offer {} Hz; capturing at {} Hz", requested, sample_rate);
    }
    info!(
        "Capture config: {}Hz  {} ch  {:?}",
        sample_rate, channels, format
    );

    let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

    // try_send keeps the realtime callback from blocking on backpressure.
    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let _ = tx.try_send(mix_mono_i16(data, channels));
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                let _ = tx.try_send(mix_mono_f32(data, channels));
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| {
                let _ = tx.try_send(mix_mono_u16(data, channels));
            },
            err_fn,
            None,
        ),
        fmt => {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{fmt:?}; use an I16, F32 or U16 device"
            )))
        }
    }
    .map_err(|e| CaptureError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    Ok((stream, sample_rate))
}

/// Prefer a config covering the requested rate, I16 first, fewest channels.
/// Falls back to the device default.
fn choose_config(device: &Device, requested: u32) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let rate = cpal::SampleRate(requested);
    let matching = device.supported_input_configs().ok().and_then(|configs| {
        configs
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(|c| (c.sample_format() != SampleFormat::I16, c.channels()))
            .map(|c| c.with_sample_rate(rate))
    });

    let supported = match matching {
        Some(cfg) => cfg,
        None => device
            .default_input_config()
            .map_err(|e| CaptureError::Device(format!("no supported input config: {e}")))?,
    };
    let format = supported.sample_format();
    Ok((supported.into(), format))
}

// ─── Per-format mono mixdown helpers ─────────────────────────────────────────

fn mix_mono_i16(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn mix_mono_f32(data: &[f32], channels: usize) -> Vec<i16> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            (mean.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        })
        .collect()
}

fn mix_mono_u16(data: &[u16], channels: usize) -> Vec<i16> {
    // U16: 0 = -32768, 32768 = 0, 65535 = +32767
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32 - 32768).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}
