//! Abstract storage interface for pluggable transcript backends

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::transcript::TranscriptBatch;

/// Durable sink for routed messages.
///
/// One `commit` call covers every owner of one routed copy: the write is
/// all-or-nothing, and a successful commit also raises the per-identity
/// "content changed" notification.
#[async_trait]
pub trait TranscriptArchiver: Send + Sync {
    async fn commit(&self, batch: &TranscriptBatch) -> Result<()>;
}
