//! Fallback backends for builds without native audio.
//!
//! Capture reports itself unavailable so the turn state machine fails fast
//! instead of hanging; playback discards payloads so the queue still drains
//! and idle reporting stays correct.

use std::sync::mpsc::Receiver;

use async_trait::async_trait;

use voxtalk_core::{AudioSink, ClientError, Result};

use crate::traits::CaptureBackend;

pub struct DummyCapture;

impl DummyCapture {
    pub fn new() -> Self {
        DummyCapture
    }
}

impl Default for DummyCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for DummyCapture {
    fn start_capture(&mut self) -> Result<Receiver<Vec<u8>>> {
        Err(ClientError::CaptureUnavailable(
            "audio capture is not available in this build (missing 'backend-native' feature)"
                .to_string(),
        ))
    }

    fn stop(&mut self) {}

    fn is_recording(&self) -> bool {
        false
    }
}

/// Discards payloads after logging their size. Keeps the playback queue
/// draining in builds without a speaker backend.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        tracing::debug!("discarding {} bytes of audio (no output backend)", audio.len());
        Ok(())
    }
}

/// Capture backend that replays a fixed script of chunks. Test double for
/// the capture-to-transport pipeline.
pub struct ScriptedCapture {
    chunks: Vec<Vec<u8>>,
    recording: bool,
}

impl ScriptedCapture {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        ScriptedCapture {
            chunks,
            recording: false,
        }
    }
}

impl CaptureBackend for ScriptedCapture {
    fn start_capture(&mut self) -> Result<Receiver<Vec<u8>>> {
        let (tx, rx) = std::sync::mpsc::channel();
        for chunk in self.chunks.drain(..) {
            let _ = tx.send(chunk);
        }
        // tx drops here: the channel closes after the scripted chunks,
        // which is the end-of-capture signal
        self.recording = true;
        Ok(rx)
    }

    fn stop(&mut self) {
        self.recording = false;
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_capture_fails_fast() {
        let mut capture = DummyCapture::new();
        assert!(matches!(
            capture.start_capture(),
            Err(ClientError::CaptureUnavailable(_))
        ));
        assert!(!capture.is_recording());
    }

    #[test]
    fn scripted_capture_yields_chunks_then_closes() {
        let mut capture = ScriptedCapture::new(vec![vec![1, 2], vec![3, 4]]);
        let rx = capture.start_capture().unwrap();
        assert!(capture.is_recording());

        let chunks: Vec<Vec<u8>> = rx.iter().collect();
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4]]);

        capture.stop();
        capture.stop(); // idempotent
        assert!(!capture.is_recording());
    }

    #[test]
    fn stop_before_any_chunk_releases_the_backend() {
        let mut capture = ScriptedCapture::new(vec![]);
        let rx = capture.start_capture().unwrap();
        capture.stop();

        assert!(!capture.is_recording());
        assert_eq!(rx.iter().count(), 0);
    }

    #[tokio::test]
    async fn null_sink_accepts_anything() {
        let sink = NullSink;
        assert!(sink.play(vec![0u8; 16]).await.is_ok());
    }
}
