//! Audio capabilities for the voice chat client
//!
//! This crate provides:
//! - Microphone capture in fixed-cadence PCM chunks via `cpal`
//!   (feature: `backend-native`)
//! - Speaker playback of encoded payloads via `rodio` (same feature)
//! - WAV framing for the two transport shapes
//! - Input level metering for the capture indicator

pub mod meter;
pub mod traits;
pub mod wav;

#[cfg(feature = "backend-native")]
pub mod cpal_backend;
#[cfg(feature = "backend-native")]
pub mod rodio_sink;

pub mod dummy_backend;

pub use meter::LevelMeter;
pub use traits::CaptureBackend;

#[cfg(feature = "backend-native")]
pub use cpal_backend::CpalCapture as Capture;
#[cfg(feature = "backend-native")]
pub use rodio_sink::RodioSink as Speaker;

#[cfg(not(feature = "backend-native"))]
pub use dummy_backend::DummyCapture as Capture;
#[cfg(not(feature = "backend-native"))]
pub use dummy_backend::NullSink as Speaker;

pub use dummy_backend::{NullSink, ScriptedCapture};

use std::sync::Arc;

/// Default capture backend for this build.
#[cfg(feature = "backend-native")]
pub fn default_capture(chunk_ms: u32, meter: Arc<LevelMeter>) -> Box<dyn CaptureBackend> {
    Box::new(cpal_backend::CpalCapture::new(chunk_ms, meter))
}

#[cfg(not(feature = "backend-native"))]
pub fn default_capture(_chunk_ms: u32, _meter: Arc<LevelMeter>) -> Box<dyn CaptureBackend> {
    Box::new(dummy_backend::DummyCapture::new())
}

/// Default playback sink for this build.
#[cfg(feature = "backend-native")]
pub fn default_speaker() -> Arc<dyn voxtalk_core::AudioSink> {
    Arc::new(rodio_sink::RodioSink::new())
}

#[cfg(not(feature = "backend-native"))]
pub fn default_speaker() -> Arc<dyn voxtalk_core::AudioSink> {
    Arc::new(dummy_backend::NullSink)
}
