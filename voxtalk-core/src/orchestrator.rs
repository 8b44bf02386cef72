//! Turn orchestration.
//!
//! The client is a state machine with a single active turn. Capture,
//! submission, response streaming and playback hand-off all run through
//! here; the UI layer only renders the events this module emits. Records
//! are applied strictly in arrival order, and every exit path from a turn
//! lands back in [`TurnState::Idle`] so the talk control is never stuck.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use conversation::{History, TranscriptEntry};

use crate::error::{ClientError, Result};
use crate::playback::PlaybackQueue;
use crate::record::{AudioPayload, StreamRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Capturing,
    AwaitingResponse,
}

/// What the UI layer renders. Everything observable about a turn arrives
/// through this channel; the orchestrator never touches a display directly.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    State(TurnState),
    /// Short status line ("listening...", "thinking...", "ready").
    Status(String),
    /// Interim recognition, replaced on every update, never persisted.
    PartialTranscript(String),
    /// A committed chat bubble.
    Transcript(TranscriptEntry),
    /// One incremental piece of the assistant's reply, for live rendering.
    AssistantToken(String),
    TurnComplete,
}

pub struct TurnOrchestrator {
    state: TurnState,
    authenticated: bool,
    /// The active turn already rendered the user's bubble (typed text is
    /// echoed at submission, before any record arrives).
    user_shown: bool,
    history: History,
    playback: Arc<PlaybackQueue>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl TurnOrchestrator {
    pub fn new(
        history_limit: usize,
        playback: Arc<PlaybackQueue>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            TurnOrchestrator {
                state: TurnState::Idle,
                authenticated: false,
                user_shown: false,
                history: History::new(history_limit),
                playback,
                events,
            },
            events_rx,
        )
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Forget the conversation context. Transcript entries already emitted
    /// stay with the UI; only the context sent with future turns is reset.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Start capturing the user's speech. Fails fast without touching the
    /// microphone when no credential is present; returns `false` when a
    /// turn is already active (the press is ignored, not queued).
    pub fn begin_capture(&mut self) -> Result<bool> {
        if !self.authenticated {
            return Err(ClientError::Unauthenticated);
        }
        if self.state != TurnState::Idle {
            return Ok(false);
        }
        self.set_state(TurnState::Capturing);
        self.user_shown = false;
        self.emit(ClientEvent::Status("listening...".to_string()));
        Ok(true)
    }

    /// Capture ended; the turn is now waiting on the backend.
    pub fn capture_finished(&mut self) {
        if self.state == TurnState::Capturing {
            self.set_state(TurnState::AwaitingResponse);
            self.emit(ClientEvent::Status("thinking...".to_string()));
        }
    }

    /// Start a typed-text turn. Ignored while capture or another turn is
    /// active, mirroring the single-active-turn rule for speech.
    pub fn begin_text_turn(&mut self, text: &str) -> Result<bool> {
        if !self.authenticated {
            return Err(ClientError::Unauthenticated);
        }
        if self.state != TurnState::Idle {
            return Ok(false);
        }
        self.set_state(TurnState::AwaitingResponse);
        self.user_shown = true;
        self.emit(ClientEvent::Transcript(TranscriptEntry::user(text)));
        self.emit(ClientEvent::Status("thinking...".to_string()));
        Ok(true)
    }

    /// Drain one turn's records, applying each in arrival order.
    ///
    /// Two record shapes commit to history: a `meta` record carries the
    /// full pair at once, while the duplex channel spreads it over
    /// `asr_final` plus accumulated `llm_token`s committed at `turn_end`.
    /// The turn ends on `turn_end`, an `error` record, or stream exhaustion;
    /// all three land back in the idle state.
    pub async fn run_turn<S>(&mut self, mut records: S)
    where
        S: Stream<Item = StreamRecord> + Unpin,
    {
        self.set_state(TurnState::AwaitingResponse);

        let mut pending_user: Option<String> = None;
        let mut assistant_text = String::new();

        while let Some(record) = records.next().await {
            match record {
                StreamRecord::AsrPartial { text } => {
                    self.emit(ClientEvent::PartialTranscript(text));
                }
                StreamRecord::AsrFinal { text } => {
                    self.emit(ClientEvent::Transcript(TranscriptEntry::user(text.as_str())));
                    pending_user = Some(text);
                }
                StreamRecord::LlmToken { text } => {
                    assistant_text.push_str(&text);
                    self.emit(ClientEvent::AssistantToken(text));
                }
                StreamRecord::Meta { user_text, ai_text } => {
                    self.history.push_turn(user_text.as_str(), ai_text.as_str());
                    // A typed turn already echoed the user's text
                    if !self.user_shown {
                        self.emit(ClientEvent::Transcript(TranscriptEntry::user(user_text)));
                    }
                    self.emit(ClientEvent::Transcript(TranscriptEntry::assistant(ai_text)));
                    // The pair is committed; nothing left to commit at turn end
                    pending_user = None;
                    assistant_text.clear();
                }
                StreamRecord::Audio { data } => {
                    self.playback.enqueue(AudioPayload::Base64(data));
                }
                StreamRecord::AudioFrame(bytes) => {
                    self.playback.enqueue(AudioPayload::Bytes(bytes));
                }
                StreamRecord::Error { message } => {
                    tracing::warn!("turn aborted by the backend: {}", message);
                    self.emit(ClientEvent::Transcript(TranscriptEntry::assistant(
                        format!("Error: {}", message),
                    )));
                    self.finish_turn();
                    return;
                }
                StreamRecord::TurnEnd => break,
            }
        }

        if let Some(user_text) = pending_user.take() {
            if !assistant_text.is_empty() {
                self.history.push_turn(user_text, assistant_text);
            }
        }

        self.finish_turn();
    }

    /// Abort the active turn from outside the record stream (transport
    /// error before any record arrived).
    pub fn abort_turn(&mut self, err: &ClientError) {
        self.emit(ClientEvent::Transcript(TranscriptEntry::assistant(
            format!("Error: {}", err),
        )));
        self.finish_turn();
    }

    fn finish_turn(&mut self) {
        self.user_shown = false;
        self.emit(ClientEvent::TurnComplete);
        self.set_state(TurnState::Idle);
        self.emit(ClientEvent::Status("ready".to_string()));
    }

    fn set_state(&mut self, state: TurnState) {
        self.state = state;
        self.emit(ClientEvent::State(state));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}
