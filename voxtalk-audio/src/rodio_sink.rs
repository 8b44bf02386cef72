//! Speaker output via rodio.

use std::io::Cursor;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};

use voxtalk_core::{AudioSink, ClientError, Result};

/// Plays one encoded payload to completion on the default output device.
///
/// The output stream is opened per payload because `OutputStream` is
/// `!Send`; playback runs on the blocking pool so the async queue task is
/// never pinned to a device handle.
pub struct RodioSink;

impl RodioSink {
    pub fn new() -> Self {
        RodioSink
    }
}

impl Default for RodioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        let played = tokio::task::spawn_blocking(move || -> Result<()> {
            let (_stream, handle) = OutputStream::try_default()
                .map_err(|e| ClientError::Playback(e.to_string()))?;
            let sink =
                Sink::try_new(&handle).map_err(|e| ClientError::Playback(e.to_string()))?;
            let source = Decoder::new(Cursor::new(audio))
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            sink.append(source);
            sink.sleep_until_end();
            Ok(())
        })
        .await;

        match played {
            Ok(result) => result,
            Err(e) => Err(ClientError::Playback(format!("playback task failed: {}", e))),
        }
    }
}
