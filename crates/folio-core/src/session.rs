//! Versioned session tokens for discarding stale async callbacks.
//!
//! Stopping a stream does not stop its in-flight socket events or renderer
//! reports. Every asynchronous unit of work captures a [`SessionToken`] at
//! submission time; on completion it compares against the current generation
//! and discards itself on mismatch. This is the sole mechanism preventing a
//! stopped stream from corrupting the state of the stream that replaced it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing generation counter. Cheap to clone; all clones
/// share one generation.
#[derive(Debug, Clone, Default)]
pub struct SessionCounter {
    generation: Arc<AtomicU64>,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session: bump the generation and return its token.
    /// Tokens from every earlier `begin` become stale immediately.
    pub fn begin(&self) -> SessionToken {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        SessionToken {
            id,
            generation: self.generation.clone(),
        }
    }

    /// Invalidate the current session without starting a new one.
    /// Used by `stop`: everything in flight goes stale, nothing replaces it.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The id the next `begin` will supersede.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Token identifying one session generation.
#[derive(Debug, Clone)]
pub struct SessionToken {
    id: u64,
    generation: Arc<AtomicU64>,
}

impl SessionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this token still names the live session. A callback holding a
    /// stale token must drop its result without touching shared state.
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.id
    }
}
