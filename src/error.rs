//! Error types for the engine
//!
//! Live-performance paths never fail; they clamp. Errors are reserved for
//! lifecycle mistakes and I/O at the edges (recording, sample decoding).

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The audio pipeline has not been initialized yet.
    #[error("audio pipeline is not initialized")]
    NotInitialized,

    /// `start` was called while a session is already open.
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// `stop` was called with no open session.
    #[error("no recording in progress")]
    NotRecording,

    /// A slot index or id did not resolve to a voice.
    #[error("unknown slot: {0}")]
    UnknownSlot(usize),

    /// A sample buffer could not be used.
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// WAV encoding or decoding failed.
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
