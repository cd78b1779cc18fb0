//! In-memory transcript store
//!
//! Transcripts are append-only: an insertion-ordered log per meeting, plus a
//! per-identity directory of the meetings that identity holds durable copies
//! of. Every save also queues a commit batch for the durable archiver.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::core::message::MessageRecord;

/// Ordered-by-insertion message log
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    order: Vec<String>,
    messages: HashMap<String, MessageRecord>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a copy of a message. Messages without a durable id are skipped.
    pub fn add(&mut self, msg: &MessageRecord) {
        let Some(id) = msg.id.clone() else {
            debug!("message without id not transcripted");
            return;
        };
        if !self.messages.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.messages.insert(id, msg.clone());
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.contains_key(message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&MessageRecord> {
        self.messages.get(message_id)
    }

    /// Messages in insertion order
    pub fn messages(&self) -> Vec<&MessageRecord> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// One durable copy of a routed message plus the identities that own it
#[derive(Debug, Clone)]
pub struct TranscriptBatch {
    pub room_id: String,
    pub message: MessageRecord,
    pub owners: Vec<String>,
}

/// Per-meeting and per-identity transcript logs
#[derive(Default)]
pub struct TranscriptStore {
    rooms: HashMap<String, Transcript>,
    users: HashMap<String, HashMap<String, Transcript>>,
    outbox: Vec<TranscriptBatch>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `msg` to the meeting log and every owner's directory, and queue
    /// one commit for the registry to flush to the archiver.
    pub fn save_message(&mut self, room_id: &str, msg: &MessageRecord, owners: &HashSet<String>) {
        self.rooms.entry(room_id.to_string()).or_default().add(msg);
        for owner in owners {
            self.users
                .entry(owner.clone())
                .or_default()
                .entry(room_id.to_string())
                .or_default()
                .add(msg);
        }
        let mut sorted: Vec<String> = owners.iter().cloned().collect();
        sorted.sort();
        self.outbox.push(TranscriptBatch {
            room_id: room_id.to_string(),
            message: msg.clone(),
            owners: sorted,
        });
        debug!(
            "transcripted message {:?} in room {} for {} owners",
            msg.id,
            room_id,
            owners.len()
        );
    }

    pub fn room_transcript(&self, room_id: &str) -> Option<&Transcript> {
        self.rooms.get(room_id)
    }

    pub fn user_transcript(&self, identity: &str, room_id: &str) -> Option<&Transcript> {
        self.users.get(identity)?.get(room_id)
    }

    /// Meetings an identity holds transcripts for
    pub fn user_rooms(&self, identity: &str) -> Vec<String> {
        self.users
            .get(identity)
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Take the commits queued since the last drain
    pub fn drain_outbox(&mut self) -> Vec<TranscriptBatch> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{Channel, MessageStatus};
    use serde_json::json;

    fn message(id: &str, creator: &str) -> MessageRecord {
        let mut msg = MessageRecord::new(Channel::Default, json!("hello"));
        msg.id = Some(id.to_string());
        msg.creator = creator.to_string();
        msg.status = MessageStatus::Posted;
        msg
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut transcript = Transcript::new();
        transcript.add(&message("m-2", "alice"));
        transcript.add(&message("m-1", "alice"));
        let ids: Vec<&str> = transcript
            .messages()
            .iter()
            .filter_map(|m| m.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["m-2", "m-1"]);
    }

    #[test]
    fn test_duplicate_add_keeps_position() {
        let mut transcript = Transcript::new();
        transcript.add(&message("m-1", "alice"));
        transcript.add(&message("m-2", "alice"));
        transcript.add(&message("m-1", "alice"));
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_message_without_id_skipped() {
        let mut transcript = Transcript::new();
        let mut msg = message("m-1", "alice");
        msg.id = None;
        transcript.add(&msg);
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_save_message_fans_out_to_owners() {
        let mut store = TranscriptStore::new();
        let msg = message("m-1", "alice");
        let owners: HashSet<String> = ["alice".to_string(), "bob".to_string()].into();
        store.save_message("room-1", &msg, &owners);

        assert!(store.room_transcript("room-1").unwrap().contains("m-1"));
        assert!(store.user_transcript("alice", "room-1").unwrap().contains("m-1"));
        assert!(store.user_transcript("bob", "room-1").unwrap().contains("m-1"));
        assert!(store.user_transcript("carol", "room-1").is_none());
        assert_eq!(store.user_rooms("bob"), vec!["room-1".to_string()]);

        let batches = store.drain_outbox();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].owners, vec!["alice".to_string(), "bob".to_string()]);
        assert!(store.drain_outbox().is_empty());
    }
}
