//! Sequencing orchestrator — one "play" action over arbitrarily long text.
//!
//! The playback engine only ever handles one bounded chunk; this component
//! segments the source, starts chunk 0, and chains the rest into gapless
//! listening. Requests never interleave: a play arriving while a session is
//! live stops it and defers the new request until the engine reports idle,
//! so two duplex connections never compete for the rendering context.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use folio_core::types::{PlaybackState, PlaybackStatus, SourceKind, TextChunk};
use folio_core::text::segment;

use crate::playback::PlaybackEngine;

/// Control surface the orchestrator drives. [`PlaybackEngine`] is the real
/// implementation; tests substitute a scripted one.
pub trait Player: Send + Sync {
    fn play(&self, page_key: &str, text: &str, voice: Option<&str>) -> u64;
    fn stop(&self);
    fn pause(&self);
    fn resume(&self);
    fn status(&self) -> PlaybackStatus;
    fn subscribe(&self) -> watch::Receiver<PlaybackStatus>;
}

impl Player for PlaybackEngine {
    fn play(&self, page_key: &str, text: &str, voice: Option<&str>) -> u64 {
        PlaybackEngine::play(self, page_key, text, voice)
    }
    fn stop(&self) {
        PlaybackEngine::stop(self)
    }
    fn pause(&self) {
        PlaybackEngine::pause(self)
    }
    fn resume(&self) {
        PlaybackEngine::resume(self)
    }
    fn status(&self) -> PlaybackStatus {
        PlaybackEngine::status(self)
    }
    fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        PlaybackEngine::subscribe(self)
    }
}

/// Key for one chunk's session: distinguishes resumed positions downstream.
pub fn chunk_key(base_key: &str, index: usize, offset: usize) -> String {
    format!("{base_key}#chunk-{index}@{offset}")
}

struct PlayRequest {
    kind: SourceKind,
    base_key: String,
    chunks: Vec<TextChunk>,
    voice: Option<String>,
}

#[derive(Default)]
struct SeqState {
    kind: Option<SourceKind>,
    base_key: String,
    chunks: Vec<TextChunk>,
    cursor: usize,
    voice: Option<String>,
    /// Session id of the chunk currently playing; 0 when nothing is.
    active_session: u64,
    /// A request parked while the previous session winds down.
    pending: Option<PlayRequest>,
}

#[derive(Clone)]
pub struct Sequencer {
    player: Arc<dyn Player>,
    state: Arc<Mutex<SeqState>>,
    max_chunk_len: usize,
}

impl Sequencer {
    /// Wrap a player and start watching it for natural chunk completions.
    pub fn new(player: Arc<dyn Player>, max_chunk_len: usize) -> Self {
        let sequencer = Self {
            player,
            state: Arc::new(Mutex::new(SeqState::default())),
            max_chunk_len,
        };

        let watcher = sequencer.clone();
        let mut status_rx = watcher.player.subscribe();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = status_rx.borrow_and_update().clone();
                if status.state == PlaybackState::Idle {
                    watcher.on_idle(status.session);
                }
            }
        });

        sequencer
    }

    /// Play a source text from `start_offset`. Returns how many chunks the
    /// session will cover (0 when the text has nothing to speak).
    pub fn play(
        &self,
        kind: SourceKind,
        base_key: &str,
        text: &str,
        start_offset: usize,
        voice: Option<&str>,
    ) -> usize {
        let chunks = segment(text, start_offset, self.max_chunk_len);
        if chunks.is_empty() {
            return 0;
        }
        let total = chunks.len();
        let request = PlayRequest {
            kind,
            base_key: base_key.to_string(),
            chunks,
            voice: voice.map(str::to_string),
        };

        let engine_busy = matches!(
            self.player.status().state,
            PlaybackState::Connecting | PlaybackState::Streaming | PlaybackState::Paused
        );

        let mut state = self.state.lock().unwrap();
        if engine_busy {
            debug!("deferring play of {base_key} until the active session stops");
            state.pending = Some(request);
            drop(state);
            self.player.stop();
        } else {
            self.start_locked(&mut state, request);
        }
        total
    }

    /// Stop the current sequence and clear anything parked.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            *state = SeqState::default();
        }
        self.player.stop();
    }

    pub fn pause(&self) {
        self.player.pause();
    }

    pub fn resume(&self) {
        self.player.resume();
    }

    /// Chunks not yet finished in the current sequence (including the one
    /// playing), plus any deferred request's chunks.
    pub fn remaining(&self) -> usize {
        let state = self.state.lock().unwrap();
        let current = if state.active_session != 0 {
            state.chunks.len() - state.cursor
        } else {
            0
        };
        current
            + state
                .pending
                .as_ref()
                .map(|r| r.chunks.len())
                .unwrap_or(0)
    }

    /// A session went idle. Start whatever should come next: a deferred
    /// request first, else the next chunk of the current sequence — but only
    /// when the idle session is the one we started (a stop-induced idle
    /// carries a different id and must not trigger an advance).
    fn on_idle(&self, session: u64) {
        let mut state = self.state.lock().unwrap();

        if let Some(request) = state.pending.take() {
            self.start_locked(&mut state, request);
            return;
        }

        if state.active_session == 0 || session != state.active_session {
            return;
        }

        if state.cursor + 1 < state.chunks.len() {
            state.cursor += 1;
            let index = state.cursor;
            let chunk = state.chunks[index].clone();
            let key = chunk_key(&state.base_key, index, chunk.offset);
            debug!("advancing to chunk {index} of {}", state.chunks.len());
            state.active_session = self.player.play(&key, &chunk.text, state.voice.as_deref());
        } else {
            debug!("{:?} sequence complete: {}", state.kind, state.base_key);
            state.active_session = 0;
        }
    }

    fn start_locked(&self, state: &mut SeqState, request: PlayRequest) {
        state.kind = Some(request.kind);
        state.base_key = request.base_key;
        state.chunks = request.chunks;
        state.cursor = 0;
        state.voice = request.voice;

        let chunk = state.chunks[0].clone();
        let key = chunk_key(&state.base_key, 0, chunk.offset);
        state.active_session = self.player.play(&key, &chunk.text, state.voice.as_deref());
    }
}
