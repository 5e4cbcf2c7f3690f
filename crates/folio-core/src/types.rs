//! Shared types for the folio chapter audio ecosystem.
//!
//! These are used across folio-lib, folio-cli, and the HTTP API. Keeping them
//! here means API consumers can deserialize job records without heavy deps.

use serde::{Deserialize, Serialize};

use crate::text::LIVE_CHUNK_LEN;

// ─── Job types ─────────────────────────────────────────────────────────────

/// Lifecycle status of a chapter audio job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// A job in one of these states owns its identity key — re-enqueueing
    /// returns the existing record unchanged.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Persisted record of one "generate audio for chapter N of book B" request.
///
/// The record is the durable source of truth and survives process restart;
/// the in-process cancellation flag does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterAudioJob {
    pub book_id: String,
    pub chapter: u32,
    pub status: JobStatus,
    /// Unix seconds when the runner picked the job up.
    pub started_at: Option<u64>,
    /// Unix seconds of the last status write.
    pub updated_at: Option<u64>,
    /// Populated only when status is `failed`.
    pub error: Option<String>,
    /// Populated only when status is `completed`.
    pub audio_url: Option<String>,
}

impl ChapterAudioJob {
    pub fn new(book_id: &str, chapter: u32, status: JobStatus) -> Self {
        Self {
            book_id: book_id.to_string(),
            chapter,
            status,
            started_at: None,
            updated_at: None,
            error: None,
            audio_url: None,
        }
    }
}

// ─── Synthesis types ───────────────────────────────────────────────────────

/// Streaming synthesis backend configuration.
#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Duplex endpoint, e.g. `ws://localhost:8880/stream`.
    pub synth_url: String,
    /// Default voice when a request doesn't name one.
    pub voice: String,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            synth_url: "ws://localhost:8880/stream".into(),
            voice: "narrator_en".into(),
        }
    }
}

/// A bounded segment of narration text submitted to the backend as one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    /// Byte offset of the chunk's start in the cleaned source text, used to
    /// resume or resolve paragraph-level playback to an absolute position.
    pub offset: usize,
}

// ─── Playback types ────────────────────────────────────────────────────────

/// Observable state of the client playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Connecting,
    Streaming,
    Paused,
    Error,
}

/// Snapshot of one playback session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    /// Monotonic session id — lets late callbacks from a stopped stream
    /// recognize themselves as stale.
    pub session: u64,
    pub state: PlaybackState,
    pub page_key: Option<String>,
    /// Seconds of audio actually rendered (played samples / sample rate).
    pub playback_seconds: f64,
    /// Seconds the backend reports having generated so far.
    pub model_seconds: f64,
    pub error: Option<String>,
}

impl PlaybackStatus {
    pub fn idle() -> Self {
        Self {
            session: 0,
            state: PlaybackState::Idle,
            page_key: None,
            playback_seconds: 0.0,
            model_seconds: 0.0,
            error: None,
        }
    }
}

/// What kind of source text a listening session covers. Page and chapter
/// sessions chain chunks until the source is exhausted; a paragraph session
/// never extends beyond its own segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Page,
    Chapter,
    Paragraph,
}

/// Engine configuration for live narration playback.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub synth: SynthConfig,
    pub max_chunk_len: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            synth: SynthConfig::default(),
            max_chunk_len: LIVE_CHUNK_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Failed.is_active());
        assert!(!JobStatus::Canceled.is_active());
    }

    #[test]
    fn job_serializes_camel_case() {
        let job = ChapterAudioJob::new("moby-dick", 3, JobStatus::Queued);
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"bookId\":\"moby-dick\""));
        assert!(json.contains("\"status\":\"queued\""));
        assert!(json.contains("\"audioUrl\":null"));
    }

    #[test]
    fn status_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: JobStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
    }
}
