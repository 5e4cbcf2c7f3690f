//! folio-core — Pure types and text processing for the folio chapter audio pipeline.
//!
//! No tokio, no I/O. Downstream consumers (folio-lib, folio-cli) can depend on
//! these types without pulling in the runtime, the websocket stack, or rodio.

pub mod session;
pub mod text;
pub mod types;
pub mod wav;
