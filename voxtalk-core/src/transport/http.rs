//! Streaming-request transport: one chunked HTTP exchange per turn.
//!
//! The request carries the captured audio (multipart) or the typed text
//! (JSON) together with the serialized history array; the response body is
//! newline-delimited JSON consumed incrementally.

use futures::StreamExt;
use futures::stream;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;

use conversation::History;

use crate::error::{ClientError, Result};
use crate::record::StreamRecord;
use crate::transport::{RecordStream, TurnOptions, drain_complete_lines};

#[derive(Serialize)]
struct ProcessTextRequest<'a> {
    text: &'a str,
    history: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport with the bearer credential attached to every
    /// request. Not restartable across credentials: construct a new one
    /// after re-authentication.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ClientError::Transport(format!("invalid token: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(HttpTransport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Submit a typed text turn and stream back the response records.
    pub async fn process_text(
        &self,
        text: &str,
        history: &History,
        opts: &TurnOptions,
    ) -> Result<RecordStream> {
        let body = ProcessTextRequest {
            text,
            history: serde_json::from_str(&history.to_wire_json())
                .unwrap_or_else(|_| serde_json::Value::Array(vec![])),
            voice_id: opts.voice_id.as_deref(),
            temperature: opts.temperature,
        };

        let response = self
            .client
            .post(format!("{}/api/process_text", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::record_stream(response)
    }

    /// Submit a captured-audio turn (multipart upload) and stream back the
    /// response records.
    pub async fn process_audio(
        &self,
        audio: Vec<u8>,
        history: &History,
        opts: &TurnOptions,
    ) -> Result<RecordStream> {
        let audio_part = reqwest::multipart::Part::bytes(audio)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("audio", audio_part)
            .text("history", history.to_wire_json());

        if let Some(voice_id) = &opts.voice_id {
            form = form.text("voice_id", voice_id.clone());
        }
        if let Some(temperature) = opts.temperature {
            form = form.text("temperature", temperature.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/process_audio", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Self::record_stream(response)
    }

    /// Turn a streaming response body into an ordered record stream.
    ///
    /// A 401 terminates immediately without reading the body; other
    /// non-success statuses abort the turn with the body as the message.
    fn record_stream(response: reqwest::Response) -> Result<RecordStream> {
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(ClientError::Server(format!("status {}", status)));
        }

        let bytes = response.bytes_stream();

        // Maintain the partial-line buffer across chunks
        let buffered = bytes.scan(String::new(), move |buffer, chunk| {
            let records = match chunk {
                Ok(chunk) => {
                    drain_complete_lines(buffer, &String::from_utf8_lossy(&chunk))
                }
                Err(err) => {
                    // The body is unusable past this point; end the turn
                    // as an error instead of a silent exhaustion
                    tracing::warn!("error reading response chunk: {}", err);
                    vec![StreamRecord::Error {
                        message: format!("connection lost: {}", err),
                    }]
                }
            };
            futures::future::ready(Some(records))
        });

        Ok(Box::pin(buffered.flat_map(stream::iter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StreamRecord;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal one-shot HTTP server: reads one request, writes a canned
    /// response, closes.
    async fn one_shot_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn text_turn_streams_records_in_order() {
        let body = "{\"type\":\"meta\",\"user_text\":\"hi\",\"ai_text\":\"hello\"}\n{\"type\":\"audio\",\"data\":\"QUJD\"}\n{\"type\":\"turn_end\"}\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let base = one_shot_server(Box::leak(response.into_boxed_str())).await;

        let transport = HttpTransport::new(&base, "T").unwrap();
        let stream = transport
            .process_text("hi", &History::new(10), &TurnOptions::default())
            .await
            .unwrap();
        let records: Vec<StreamRecord> = stream.collect().await;

        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], StreamRecord::Meta { .. }));
        assert!(matches!(records[1], StreamRecord::Audio { .. }));
        assert!(matches!(records[2], StreamRecord::TurnEnd));
    }

    #[tokio::test]
    async fn unauthorized_terminates_without_parsing_body() {
        let base = one_shot_server(
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 24\r\n\r\n{\"detail\":\"bad token\"}\n\n",
        )
        .await;

        let transport = HttpTransport::new(&base, "stale").unwrap();
        let err = transport
            .process_text("hi", &History::new(10), &TurnOptions::default())
            .await
            .err()
            .expect("401 must be an error");
        assert!(matches!(err, ClientError::Unauthenticated));
    }

    #[tokio::test]
    async fn mid_body_disconnect_ends_the_turn_with_an_error_record() {
        // Advertise more body than is sent, then close: the read fails
        // partway through the stream
        let body = "{\"type\":\"llm_token\",\"text\":\"It\"}\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: 4096\r\n\r\n{}",
            body
        );
        let base = one_shot_server(Box::leak(response.into_boxed_str())).await;

        let transport = HttpTransport::new(&base, "T").unwrap();
        let stream = transport
            .process_text("hi", &History::new(10), &TurnOptions::default())
            .await
            .unwrap();
        let records: Vec<StreamRecord> = stream.collect().await;

        assert!(matches!(records[0], StreamRecord::LlmToken { .. }));
        match records.last() {
            Some(StreamRecord::Error { message }) => {
                assert!(message.starts_with("connection lost"));
            }
            other => panic!("expected a terminal error record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn server_failure_aborts_the_turn() {
        let base = one_shot_server(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n",
        )
        .await;

        let transport = HttpTransport::new(&base, "T").unwrap();
        let err = transport
            .process_text("hi", &History::new(10), &TurnOptions::default())
            .await
            .err()
            .expect("500 must be an error");
        assert!(matches!(err, ClientError::Server(_)));
    }
}
