//! Microphone capture via cpal.
//!
//! `cpal::Stream` is `!Send`, so a dedicated thread owns the stream for the
//! whole capture. The callback normalizes samples to f32 for the level
//! meter, converts to s16le, and ships fixed-cadence chunks over a std
//! channel. Dropping the handle (or calling `stop`) signals the thread to
//! release the device.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use voxtalk_core::{ClientError, Result};

use crate::meter::LevelMeter;
use crate::traits::CaptureBackend;
use crate::wav;

struct StreamHandle {
    stop_tx: Sender<()>,
    #[allow(dead_code)]
    thread: Option<JoinHandle<()>>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

pub struct CpalCapture {
    chunk_ms: u32,
    meter: Arc<LevelMeter>,
    handle: Option<StreamHandle>,
}

impl CpalCapture {
    pub fn new(chunk_ms: u32, meter: Arc<LevelMeter>) -> Self {
        CpalCapture {
            chunk_ms: chunk_ms.max(20),
            meter,
            handle: None,
        }
    }
}

/// Accumulates converted samples and emits a chunk every `chunk_samples`.
struct Chunker {
    chunk_samples: usize,
    pending: Vec<f32>,
    chunk_tx: Sender<Vec<u8>>,
    meter: Arc<LevelMeter>,
}

impl Chunker {
    fn push(&mut self, samples: &[f32]) {
        self.meter.update(samples);
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            let chunk = wav::pcm_bytes(&self.pending);
            self.pending = rest;
            if self.chunk_tx.send(chunk).is_err() {
                // Receiver gone; the stop signal will follow shortly
                return;
            }
        }
    }

}

impl Drop for Chunker {
    // Flush the tail when the stream is torn down
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let chunk = wav::pcm_bytes(&self.pending);
            let _ = self.chunk_tx.send(chunk);
        }
    }
}

impl CaptureBackend for CpalCapture {
    fn start_capture(&mut self) -> Result<Receiver<Vec<u8>>> {
        if self.handle.is_some() {
            self.stop();
        }

        let (chunk_tx, chunk_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let chunk_ms = self.chunk_ms;
        let meter = self.meter.clone();

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err("no input device available".to_string()));
                    return;
                }
            };

            let supported: Vec<_> = match device.supported_input_configs() {
                Ok(configs) => configs.collect(),
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("input configs unavailable: {}", e)));
                    return;
                }
            };
            let chosen = supported
                .iter()
                .filter(|c| c.channels() == 1)
                .find(|c| c.sample_format() == SampleFormat::F32)
                .or_else(|| supported.iter().find(|c| c.channels() <= 2));
            let chosen = match chosen {
                Some(c) => c,
                None => {
                    let _ = ready_tx.send(Err("no usable input config".to_string()));
                    return;
                }
            };

            let desired = SampleRate(wav::SAMPLE_RATE);
            let sample_rate =
                if chosen.min_sample_rate() <= desired && desired <= chosen.max_sample_rate() {
                    desired
                } else {
                    chosen.min_sample_rate()
                };
            let config = StreamConfig {
                channels: 1,
                sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            let chunk_samples = (sample_rate.0 as usize * chunk_ms as usize) / 1000;
            let mut chunker = Chunker {
                chunk_samples: chunk_samples.max(1),
                pending: Vec::with_capacity(chunk_samples * 2),
                chunk_tx,
                meter,
            };

            let stream_result = match chosen.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        chunker.push(data);
                    },
                    |err| tracing::error!("capture stream error: {}", err),
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> = data
                            .iter()
                            .map(|&s| f32::from(s) / i16::MAX as f32)
                            .collect();
                        chunker.push(&converted);
                    },
                    |err| tracing::error!("capture stream error: {}", err),
                    None,
                ),
                other => {
                    let _ = ready_tx.send(Err(format!("unsupported sample format {:?}", other)));
                    return;
                }
            };

            let stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Hold the stream until stop; dropping it closes the chunk
            // channel and releases the device.
            let _ = stop_rx.recv();
            drop(stream);
            tracing::debug!("capture thread exiting");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ClientError::CaptureUnavailable(e)),
            Err(_) => {
                return Err(ClientError::CaptureUnavailable(
                    "capture thread failed to start".to_string(),
                ));
            }
        }

        self.handle = Some(StreamHandle {
            stop_tx,
            thread: Some(thread),
        });

        Ok(chunk_rx)
    }

    fn stop(&mut self) {
        self.meter.reset();
        self.handle.take();
    }

    fn is_recording(&self) -> bool {
        self.handle.is_some()
    }
}
