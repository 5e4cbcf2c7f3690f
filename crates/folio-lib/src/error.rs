//! Error taxonomy for the chapter audio pipeline.
//!
//! Precondition errors fail fast before any job-state mutation; transport,
//! empty-result, and encoding errors are terminal for one job attempt and are
//! recorded on the job record. Cancellation is a status, not an error.

use std::path::PathBuf;
use thiserror::Error;

/// Failures at the streaming synthesis boundary.
#[derive(Debug, Error)]
pub enum SynthError {
    /// Transport-level failure: refused connection, peer error event,
    /// handshake rejection.
    #[error("synthesis connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the stream having produced zero audio bytes.
    /// Distinguished from transport failure; also terminal for the attempt.
    #[error("no audio returned from streaming service")]
    NoAudio,

    /// The request could not be formed (bad endpoint URL).
    #[error("invalid synthesis endpoint: {0}")]
    BadEndpoint(String),
}

/// Failures while wrapping and encoding assembled audio.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("audio assembly io error: {0}")]
    Io(#[from] std::io::Error),

    /// The external encoder binary is not installed or not on PATH.
    #[error("failed to encode audio: encoder `{0}` not found")]
    EncoderMissing(String),

    /// The encoder ran and reported failure.
    #[error("failed to encode audio: {0}")]
    EncoderFailed(String),
}

/// Failures surfaced by the job scheduler and runner.
#[derive(Debug, Error)]
pub enum JobError {
    /// Chapter numbers are 1-based.
    #[error("invalid chapter number: {0}")]
    InvalidChapter(u32),

    /// Fatal precondition: the chapter has no narration text on disk.
    #[error("narration file not found: {}", .0.display())]
    NarrationMissing(PathBuf),

    #[error(transparent)]
    Synth(#[from] SynthError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("job store error: {0}")]
    Store(#[from] std::io::Error),
}
