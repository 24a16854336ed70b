//! Error taxonomy for the sync engine
//!
//! Transport failures are recoverable and retried locally; protocol
//! failures drop the offending frame with a diagnostic and the stream
//! continues; retries-exhausted is terminal and surfaced exactly once;
//! stale-subject is an internal guard that is discarded silently.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket-level failure. Recoverable: the connection retries with
    /// backoff before this ever reaches a consumer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized frame. One bad frame never kills the
    /// stream; it is dropped with a diagnostic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The reconnect ceiling was reached. Terminal; no further automatic
    /// action is taken until the consumer reactivates the subject.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// A deferred callback outlived its subject. Never surfaced.
    #[error("stale subject: frame generation {frame} != current {current}")]
    StaleSubject { frame: u64, current: u64 },

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
