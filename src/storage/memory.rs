//! In-memory archiver for embedding and tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;

use crate::error::Result;
use crate::storage::traits::TranscriptArchiver;
use crate::storage::transcript::TranscriptBatch;

/// Records committed batches and the change notices they raised
#[derive(Default)]
pub struct MemoryArchiver {
    committed: Mutex<Vec<TranscriptBatch>>,
    notices: Mutex<Vec<(String, String)>>,
}

impl MemoryArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn committed(&self) -> Vec<TranscriptBatch> {
        self.committed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Content-changed notices as (identity, room id) pairs
    pub fn notices(&self) -> Vec<(String, String)> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TranscriptArchiver for MemoryArchiver {
    async fn commit(&self, batch: &TranscriptBatch) -> Result<()> {
        {
            let mut notices = self.notices.lock().unwrap_or_else(|e| e.into_inner());
            for owner in &batch.owners {
                debug!("content changed for {} in room {}", owner, batch.room_id);
                notices.push((owner.clone(), batch.room_id.clone()));
            }
        }
        self.committed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.clone());
        Ok(())
    }
}

/// Create a new shared in-memory archiver
pub fn create_memory_archiver() -> Arc<MemoryArchiver> {
    Arc::new(MemoryArchiver::new())
}
