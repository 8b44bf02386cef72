use std::sync::mpsc::Receiver;

use voxtalk_core::Result;

/// Microphone capture producing fixed-cadence chunks of 16 kHz mono s16le
/// PCM. The receiver closing marks end-of-capture; callers frame the bytes
/// for their transport (streaming WAV header up front, or a finalized file).
pub trait CaptureBackend: Send {
    /// Start capturing and return the chunk channel. Fails when no input
    /// device is available or the device refuses the stream.
    fn start_capture(&mut self) -> Result<Receiver<Vec<u8>>>;

    /// Stop capturing and release the device. Idempotent.
    fn stop(&mut self);

    fn is_recording(&self) -> bool;
}
