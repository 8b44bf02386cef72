//! Transport sessions.
//!
//! Two variants with one contract: an ordered, lazy sequence of
//! [`StreamRecord`]s for the turn orchestrator to drain. The choice of
//! variant is made at construction time, never inside the orchestrator.
//!
//! - [`http::HttpTransport`] issues one streaming request per turn and reads
//!   the chunked response body as newline-delimited JSON.
//! - [`ws::DuplexSession`] keeps one websocket open across many turns, with
//!   supervised reconnection.

pub mod http;
pub mod ws;

use std::pin::Pin;

use futures::stream::Stream;

use crate::record::{StreamRecord, parse_record};

/// Boxed record stream produced by the streaming-request transport.
pub type RecordStream = Pin<Box<dyn Stream<Item = StreamRecord> + Send>>;

/// Per-turn knobs forwarded to the backend.
#[derive(Clone, Debug, Default)]
pub struct TurnOptions {
    pub voice_id: Option<String>,
    pub temperature: Option<f32>,
}

/// Append `incoming` to `buffer` and drain every complete line into parsed
/// records. A record boundary is only recognized at a full `\n`-terminated
/// line; a trailing partial line stays in the buffer and is prefixed to the
/// next read. Malformed lines are logged and dropped.
pub(crate) fn drain_complete_lines(buffer: &mut String, incoming: &str) -> Vec<StreamRecord> {
    buffer.push_str(incoming);

    let mut records = Vec::new();
    let mut last_newline_pos = 0;

    for (idx, _) in buffer.match_indices('\n') {
        let line = &buffer[last_newline_pos..idx];
        last_newline_pos = idx + 1;

        if let Some(record) = parse_record(line) {
            records.push(record);
        }
    }

    // Keep the incomplete tail for the next chunk
    *buffer = buffer[last_newline_pos..].to_string();

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_lines_parse_in_order() {
        let mut buf = String::new();
        let records = drain_complete_lines(
            &mut buf,
            "{\"type\":\"meta\",\"user_text\":\"hi\",\"ai_text\":\"hello\"}\n{\"type\":\"turn_end\"}\n",
        );
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], StreamRecord::Meta { .. }));
        assert!(matches!(records[1], StreamRecord::TurnEnd));
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_line_is_reassembled_across_chunks_and_parsed_once() {
        let mut buf = String::new();

        let first = drain_complete_lines(&mut buf, "{\"type\":\"audio\",\"dat");
        assert!(first.is_empty());
        assert_eq!(buf, "{\"type\":\"audio\",\"dat");

        let second = drain_complete_lines(&mut buf, "a\":\"QUJD\"}\n");
        assert_eq!(second.len(), 1);
        match &second[0] {
            StreamRecord::Audio { data } => assert_eq!(data, "QUJD"),
            other => panic!("expected audio record, got {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_line_is_skipped_and_stream_continues() {
        let mut buf = String::new();
        let records = drain_complete_lines(
            &mut buf,
            "{broken json}\n{\"type\":\"turn_end\"}\n",
        );
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], StreamRecord::TurnEnd));
    }

    #[test]
    fn single_byte_chunks_still_yield_one_record() {
        let mut buf = String::new();
        let line = "{\"type\":\"asr_final\",\"text\":\"hi\"}\n";
        let mut records = Vec::new();
        for ch in line.chars() {
            records.extend(drain_complete_lines(&mut buf, &ch.to_string()));
        }
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn trailing_partial_line_without_newline_is_not_parsed() {
        let mut buf = String::new();
        let records = drain_complete_lines(
            &mut buf,
            "{\"type\":\"turn_end\"}\n{\"type\":\"error\",\"message\":\"trunc",
        );
        assert_eq!(records.len(), 1);
        assert!(!buf.is_empty());
    }
}
