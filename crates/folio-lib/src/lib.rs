//! folio-lib — Chapter audio engine.
//!
//! Streaming synthesis, frame normalization, audio assembly, the persistent
//! job scheduler, the client playback engine, the sequencing orchestrator,
//! and the HTTP API. Depends on folio-core for pure types and text
//! processing.

pub mod assemble;
pub mod error;
pub mod frame;
pub mod jobs;
pub mod playback;
pub mod sequence;
pub mod server;
pub mod synth;

// Re-export folio-core for convenience
pub use folio_core;
