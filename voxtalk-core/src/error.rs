use thiserror::Error;

/// Client-side failure taxonomy. Every failure is caught at the boundary
/// where it occurs and converted into a status update plus, when a turn was
/// in flight, a forced return to the idle state.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No capture device, or permission denied.
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Missing or rejected credential. Reopens the auth flow and aborts the
    /// active turn.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// Network or connection failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Non-success response or structured error record from the backend.
    #[error("server error: {0}")]
    Server(String),

    /// An audio payload that could not be normalized or decoded. Playback
    /// skips the item; this never stalls the queue.
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// Speaker output failure (device missing, output stream refused).
    #[error("audio playback failed: {0}")]
    Playback(String),

    /// Credential persistence failure.
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
