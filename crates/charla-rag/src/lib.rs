//! Retrieval-augmented generation: embed the user's text, pull the nearest
//! knowledge entries and few-shot conversation examples, and render them as
//! prompt blocks.

pub mod error;
pub mod retriever;

pub use error::RagError;
pub use retriever::{retrieve, RagContext};
