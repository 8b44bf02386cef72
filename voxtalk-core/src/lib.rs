//! Core client engine for the voice chat assistant.
//!
//! Everything above the UI lives here: account endpoints and credential
//! persistence, the two transports that stream a turn's records back from
//! the backend, the ordered playback queue, and the turn orchestrator that
//! ties them together under the single-active-turn rule.

pub mod auth;
pub mod error;
pub mod orchestrator;
pub mod playback;
pub mod record;
pub mod transport;

pub use auth::{AuthClient, Credential, CredentialStore};
pub use error::{ClientError, Result};
pub use orchestrator::{ClientEvent, TurnOrchestrator, TurnState};
pub use playback::{AudioSink, PlaybackQueue};
pub use record::{AudioPayload, StreamRecord, parse_record};
pub use transport::http::HttpTransport;
pub use transport::ws::{ConnectionStatus, DuplexSession};
pub use transport::{RecordStream, TurnOptions};
