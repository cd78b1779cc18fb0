//! Transcript storage and the durable-backend boundary

pub mod memory;
pub mod traits;
pub mod transcript;

pub use memory::{create_memory_archiver, MemoryArchiver};
pub use traits::TranscriptArchiver;
pub use transcript::{Transcript, TranscriptBatch, TranscriptStore};
