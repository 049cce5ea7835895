//! The debounce pipeline: absorb a burst of inbound messages into one
//! logical turn per session.

pub mod aggregate;
pub mod drain;
pub mod hash;
pub mod ingest;

pub use aggregate::aggregate;
pub use drain::{process_pending, DrainError};
pub use hash::session_key_hash;
pub use ingest::{ingest, IngestOutcome};
