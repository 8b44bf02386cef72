//! Persistent duplex transport.
//!
//! One websocket carries many turns: capture chunks go out as binary frames
//! the moment they are produced, a `{"action":"finish_speaking"}` text frame
//! ends the user's speech, and inbound frames are routed by type — binary
//! frames are synthesized audio, text frames are JSON records.
//!
//! The connection is supervised: an unexpected close schedules a re-dial
//! after a fixed delay, indefinitely, and every state change is observable
//! on a watch channel. A close with code 4001 is the backend's
//! authentication rejection and stops the retry loop.

use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};

use crate::record::{StreamRecord, parse_record};

/// Close code the backend uses to reject an invalid token.
const CLOSE_UNAUTHORIZED: u16 = 4001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    ClosedRetrying,
    /// Terminal: the backend rejected the credential.
    Unauthorized,
}

#[derive(Debug)]
enum OutboundFrame {
    Audio(Vec<u8>),
    FinishSpeaking,
}

enum ConnectionEnd {
    /// Connection dropped; the supervisor should re-dial.
    Closed,
    /// Close code 4001 — do not retry.
    AuthRejected,
    /// The session handle was dropped; stop supervising.
    Shutdown,
}

/// Handle to the supervised duplex session. Process-wide: one per client
/// lifetime, shared by all turns. Dropping it tears the connection down.
pub struct DuplexSession {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    records: UnboundedReceiverStream<StreamRecord>,
    status_rx: watch::Receiver<ConnectionStatus>,
    supervisor: JoinHandle<()>,
}

impl DuplexSession {
    /// Open the session and start the reconnect supervisor.
    pub fn connect(url: String, reconnect_delay: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let supervisor = tokio::spawn(supervise(
            url,
            reconnect_delay,
            outbound_rx,
            record_tx,
            status_tx,
        ));

        DuplexSession {
            outbound_tx,
            records: UnboundedReceiverStream::new(record_rx),
            status_rx,
            supervisor,
        }
    }

    /// Stream one capture chunk to the backend as a binary frame. Chunks
    /// sent while the connection is re-dialing are dropped, matching the
    /// half-duplex turn model (the user must press to talk again).
    pub fn send_audio_chunk(&self, chunk: Vec<u8>) {
        let _ = self.outbound_tx.send(OutboundFrame::Audio(chunk));
    }

    /// Signal end-of-user-speech with the explicit control frame.
    pub fn finish_speaking(&self) {
        let _ = self.outbound_tx.send(OutboundFrame::FinishSpeaking);
    }

    /// Cloneable sender half, for feeding chunks from a capture thread.
    pub fn handle(&self) -> DuplexHandle {
        DuplexHandle {
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn is_open(&self) -> bool {
        *self.status_rx.borrow() == ConnectionStatus::Open
    }

    /// The unified inbound record stream, shared across turns. The
    /// orchestrator drains it up to each `turn_end`.
    pub fn records_mut(&mut self) -> &mut UnboundedReceiverStream<StreamRecord> {
        &mut self.records
    }

    /// Throw away records buffered between turns (a disconnect notice from
    /// an idle-time drop, stragglers from an aborted turn) so they cannot
    /// end the next turn before it starts.
    pub fn discard_pending(&mut self) {
        while let Some(Some(record)) = self.records.next().now_or_never() {
            tracing::debug!("discarding stale record: {:?}", record);
        }
    }
}

impl Drop for DuplexSession {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Sender half of the session, detached from its lifetime. Sends after the
/// session is dropped are silently discarded.
#[derive(Clone)]
pub struct DuplexHandle {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl DuplexHandle {
    pub fn send_audio_chunk(&self, chunk: Vec<u8>) {
        let _ = self.outbound_tx.send(OutboundFrame::Audio(chunk));
    }

    pub fn finish_speaking(&self) {
        let _ = self.outbound_tx.send(OutboundFrame::FinishSpeaking);
    }
}

async fn supervise(
    url: String,
    reconnect_delay: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    record_tx: mpsc::UnboundedSender<StreamRecord>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                tracing::info!("duplex channel connected");
                let _ = status_tx.send(ConnectionStatus::Open);
                match run_connection(stream, &mut outbound_rx, &record_tx).await {
                    ConnectionEnd::Closed => {
                        // A turn may be draining this stream; losing the
                        // connection must end that turn, not hang it. The
                        // re-dial below is for the session only.
                        let _ = record_tx.send(StreamRecord::Error {
                            message: "connection lost".to_string(),
                        });
                    }
                    ConnectionEnd::AuthRejected => {
                        tracing::warn!("duplex channel rejected the credential");
                        let _ = status_tx.send(ConnectionStatus::Unauthorized);
                        let _ = record_tx.send(StreamRecord::Error {
                            message: "unauthorized".to_string(),
                        });
                        return;
                    }
                    ConnectionEnd::Shutdown => return,
                }
            }
            Err(tungstenite::Error::Http(response))
                if response.status().as_u16() == 401 || response.status().as_u16() == 403 =>
            {
                let _ = status_tx.send(ConnectionStatus::Unauthorized);
                let _ = record_tx.send(StreamRecord::Error {
                    message: "unauthorized".to_string(),
                });
                return;
            }
            Err(err) => {
                tracing::warn!("duplex connect failed: {}", err);
            }
        }

        if record_tx.is_closed() {
            return;
        }

        tracing::info!(
            "duplex channel closed, retrying in {:?}",
            reconnect_delay
        );
        let _ = status_tx.send(ConnectionStatus::ClosedRetrying);
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn run_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    record_tx: &mpsc::UnboundedSender<StreamRecord>,
) -> ConnectionEnd {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(OutboundFrame::Audio(bytes)) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        return ConnectionEnd::Closed;
                    }
                }
                Some(OutboundFrame::FinishSpeaking) => {
                    let control = "{\"action\":\"finish_speaking\"}".to_string();
                    if sink.send(Message::Text(control)).await.is_err() {
                        return ConnectionEnd::Closed;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    let _ = record_tx.send(StreamRecord::AudioFrame(data));
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(record) = parse_record(&text) {
                        let _ = record_tx.send(record);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let rejected = frame
                        .as_ref()
                        .map(|f| u16::from(f.code) == CLOSE_UNAUTHORIZED)
                        .unwrap_or(false);
                    return if rejected {
                        ConnectionEnd::AuthRejected
                    } else {
                        ConnectionEnd::Closed
                    };
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by the protocol layer
                }
                Some(Err(err)) => {
                    tracing::warn!("duplex read error: {}", err);
                    return ConnectionEnd::Closed;
                }
                None => return ConnectionEnd::Closed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn routes_binary_frames_to_audio_and_text_frames_to_records() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();

            // Wait for the client's speech: chunks then the finish frame
            let mut got_audio = false;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(data) => {
                        assert!(!data.is_empty());
                        got_audio = true;
                    }
                    Message::Text(text) => {
                        assert!(text.contains("finish_speaking"));
                        break;
                    }
                    _ => {}
                }
            }
            assert!(got_audio);

            ws.send(Message::Text(
                "{\"type\":\"asr_final\",\"text\":\"hi\"}".to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Binary(vec![9, 9, 9])).await.unwrap();
            ws.send(Message::Text("{\"type\":\"turn_end\"}".to_string()))
                .await
                .unwrap();
        });

        let mut session = DuplexSession::connect(url, Duration::from_secs(3));
        session.send_audio_chunk(vec![1, 2, 3]);
        session.finish_speaking();

        let records = session.records_mut();
        assert!(matches!(
            records.next().await,
            Some(StreamRecord::AsrFinal { .. })
        ));
        assert!(matches!(
            records.next().await,
            Some(StreamRecord::AudioFrame(data)) if data == vec![9, 9, 9]
        ));
        assert!(matches!(records.next().await, Some(StreamRecord::TurnEnd)));
    }

    #[tokio::test]
    async fn reconnects_after_unexpected_close() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            // First connection: accept and drop immediately
            let (socket, _) = listener.accept().await.unwrap();
            let ws = accept_async(socket).await.unwrap();
            drop(ws);

            // Second connection: serve one record
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.send(Message::Text("{\"type\":\"turn_end\"}".to_string()))
                .await
                .unwrap();
            // Hold the connection open until the client is done
            let _ = ws.next().await;
        });

        let mut session = DuplexSession::connect(url, Duration::from_millis(50));
        let records = session.records_mut();

        // The drop is reported before the re-dial
        assert!(matches!(
            records.next().await,
            Some(StreamRecord::Error { message }) if message == "connection lost"
        ));
        assert!(matches!(records.next().await, Some(StreamRecord::TurnEnd)));
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn connection_drop_mid_turn_surfaces_a_terminal_error() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.send(Message::Text(
                "{\"type\":\"llm_token\",\"text\":\"It\"}".to_string(),
            ))
            .await
            .unwrap();
            // Drop without a close frame: the turn is still in flight
            drop(ws);
        });

        let mut session = DuplexSession::connect(url, Duration::from_secs(60));
        let records = session.records_mut();
        assert!(matches!(
            records.next().await,
            Some(StreamRecord::LlmToken { .. })
        ));
        match records.next().await {
            Some(StreamRecord::Error { message }) => {
                assert_eq!(message, "connection lost");
            }
            other => panic!("expected a terminal error record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_records_are_discarded_before_a_new_turn() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            // First connection drops while idle, leaving a disconnect
            // notice in the buffer
            let (socket, _) = listener.accept().await.unwrap();
            let ws = accept_async(socket).await.unwrap();
            drop(ws);

            // Second connection waits for the client's first chunk before
            // replying, so nothing new is buffered until discard has run
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text("{\"type\":\"turn_end\"}".to_string()))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let mut session = DuplexSession::connect(url, Duration::from_millis(50));

        // Let the drop land and the session reconnect; the disconnect
        // notice is buffered before the re-dial starts
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !session.is_open() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        session.discard_pending();
        session.send_audio_chunk(vec![1]);
        let record = session.records_mut().next().await;
        assert!(matches!(record, Some(StreamRecord::TurnEnd)));
    }

    #[tokio::test]
    async fn close_code_4001_stops_the_retry_loop() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4001),
                reason: "Unauthorized".into(),
            }))
            .await
            .unwrap();
        });

        let mut session = DuplexSession::connect(url, Duration::from_millis(50));
        let record = session.records_mut().next().await;
        match record {
            Some(StreamRecord::Error { message }) => {
                assert_eq!(message, "unauthorized");
            }
            other => panic!("expected error record, got {:?}", other),
        }
        let mut status = session.status();
        let status = *status.borrow_and_update();
        assert_eq!(status, ConnectionStatus::Unauthorized);
    }

    #[tokio::test]
    async fn malformed_text_frame_is_dropped_without_closing() {
        let (listener, url) = bind().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            ws.send(Message::Text("{{{garbage".to_string()))
                .await
                .unwrap();
            ws.send(Message::Text("{\"type\":\"turn_end\"}".to_string()))
                .await
                .unwrap();
            let _ = ws.next().await;
        });

        let mut session = DuplexSession::connect(url, Duration::from_secs(3));
        let record = session.records_mut().next().await;
        assert!(matches!(record, Some(StreamRecord::TurnEnd)));
    }
}
