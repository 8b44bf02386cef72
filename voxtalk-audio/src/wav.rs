//! WAV framing for captured PCM.
//!
//! Capture produces raw s16le samples; the transport decides the framing.
//! The duplex channel sends a streaming header once and raw chunks after
//! it, so the header carries the unknown-length sentinel. The per-turn
//! upload builds a complete file and patches the real sizes in before
//! sending.

use byteorder::{ByteOrder, LittleEndian};

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
const BYTES_PER_SAMPLE: u16 = 2;

/// Size fields for a stream whose length is not yet known.
const UNKNOWN_SIZE: u32 = 0xFFFF_FFFF;

/// 44-byte PCM WAV header with sentinel sizes, suitable for prefixing a
/// live chunk stream.
pub fn streaming_header(sample_rate: u32, channels: u16) -> [u8; 44] {
    let block_align = channels * BYTES_PER_SAMPLE;
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], UNKNOWN_SIZE);
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16); // fmt chunk size
    LittleEndian::write_u16(&mut header[20..22], 1); // PCM
    LittleEndian::write_u16(&mut header[22..24], channels);
    LittleEndian::write_u32(&mut header[24..28], sample_rate);
    LittleEndian::write_u32(&mut header[28..32], byte_rate);
    LittleEndian::write_u16(&mut header[32..34], block_align);
    LittleEndian::write_u16(&mut header[34..36], BYTES_PER_SAMPLE * 8);
    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], UNKNOWN_SIZE);
    header
}

/// Assemble a complete WAV file from raw PCM chunks.
pub fn assemble_wav(sample_rate: u32, channels: u16, chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut file = streaming_header(sample_rate, channels).to_vec();
    for chunk in chunks {
        file.extend_from_slice(chunk);
    }
    finalize_wav(&mut file);
    file
}

/// Patch the RIFF and data chunk sizes once the stream length is known.
pub fn finalize_wav(file: &mut [u8]) {
    if file.len() < 44 {
        return;
    }
    let total = file.len() as u32;
    LittleEndian::write_u32(&mut file[4..8], total - 8);
    LittleEndian::write_u32(&mut file[40..44], total - 44);
}

/// Convert normalized f32 samples to s16le bytes.
pub fn pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
