//! Wire records received from the backend within one turn.
//!
//! Both transports normalize into this one type: the streaming-request
//! variant parses newline-delimited JSON objects, the duplex variant parses
//! JSON text frames and maps raw binary frames to [`StreamRecord::AudioFrame`].
//! Arrival order is authoritative; the client never reorders records.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    /// Interim recognition of the user's speech; status display only.
    AsrPartial { text: String },
    /// Final recognition of the user's speech.
    AsrFinal { text: String },
    /// One incremental piece of the assistant's reply.
    LlmToken { text: String },
    /// Full turn summary: the recognized user text and the complete reply.
    Meta { user_text: String, ai_text: String },
    /// Base64-encoded synthesized speech payload.
    Audio { data: String },
    TurnEnd,
    Error { message: String },

    /// Raw binary audio frame from the duplex channel. Never appears in
    /// JSON; the websocket session produces it for binary frames.
    #[serde(skip)]
    AudioFrame(Vec<u8>),
}

/// An audio payload as held by the playback queue: raw bytes from a binary
/// frame, or the textual encoding from a JSON record. Normalized to bytes
/// before the decode capability sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioPayload {
    Bytes(Vec<u8>),
    Base64(String),
}

impl AudioPayload {
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            AudioPayload::Bytes(b) => Ok(b),
            AudioPayload::Base64(s) => BASE64
                .decode(s.trim())
                .map_err(|e| ClientError::Decode(format!("invalid base64 payload: {}", e))),
        }
    }
}

/// Parse one JSON line or text frame into a record. Malformed input is
/// reported as `None` after logging; a bad record never aborts the stream.
pub fn parse_record(raw: &str) -> Option<StreamRecord> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamRecord>(raw) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!("dropping malformed record: {} ({})", raw, err);
            None
        }
    }
}
