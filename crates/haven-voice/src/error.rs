//! Error types for the realtime voice session.

use thiserror::Error;

/// Result type alias for voice operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors surfaced by the voice session. All of them reach callers through
/// the `on_error` callback — the capture loop has no caller to unwind to —
/// and none triggers an automatic reconnect.
#[derive(Error, Debug, Clone)]
pub enum VoiceError {
    /// Microphone access denied or no input device present. Fatal to the
    /// session; it stays closed.
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Network or protocol failure on the live session. Endpoint close
    /// reasons are embedded verbatim; cancellation races during teardown
    /// (e.g. "CANCELLED", normal closure) are known-benign and callers
    /// filter them by message content rather than treating them as fatal.
    #[error("session error: {0}")]
    Session(String),

    /// Malformed server audio. Non-fatal: the chunk is dropped and the
    /// session continues.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// No API credential resolvable from the environment.
    #[error("no API credential found (set HAVEN_API_KEY or GEMINI_API_KEY)")]
    CredentialMissing,

    /// Invalid session configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Output device or playback graph failure.
    #[error("playback error: {0}")]
    Playback(String),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::PermissionDenied(err.to_string())
    }
}
