//! Process-wide directory of active meetings
//!
//! The registry orchestrates room creation, entry, exit and message dispatch,
//! and flushes transcript commits to the durable archiver. Every mutating
//! operation runs under one write guard, which gives each meeting the strict
//! sequential routing the moderation queue and broadcast computations rely on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::core::container::MeetingContainer;
use crate::core::events::{OccupantRef, RoomInfo, RoomRequest};
use crate::core::meeting::Meeting;
use crate::core::message::MessageRecord;
use crate::core::session::{Session, SessionDirectory};
use crate::storage::traits::TranscriptArchiver;
use crate::storage::transcript::TranscriptStore;

pub struct MeetingRegistry {
    config: EngineConfig,
    /// Active rooms only
    rooms: HashMap<String, Meeting>,
    /// Read-only lookup from container id to hosting space
    containers: HashMap<String, Arc<dyn MeetingContainer>>,
    transcripts: TranscriptStore,
    sessions: Arc<dyn SessionDirectory>,
    archiver: Arc<dyn TranscriptArchiver>,
}

impl MeetingRegistry {
    pub fn new(sessions: Arc<dyn SessionDirectory>, archiver: Arc<dyn TranscriptArchiver>) -> Self {
        Self::with_config(EngineConfig::default(), sessions, archiver)
    }

    pub fn with_config(
        config: EngineConfig,
        sessions: Arc<dyn SessionDirectory>,
        archiver: Arc<dyn TranscriptArchiver>,
    ) -> Self {
        Self {
            config,
            rooms: HashMap::new(),
            containers: HashMap::new(),
            transcripts: TranscriptStore::new(),
            sessions,
            archiver,
        }
    }

    /// Make a hosting space known under its container id
    pub fn register_container(
        &mut self,
        container_id: impl Into<String>,
        container: Arc<dyn MeetingContainer>,
    ) {
        self.containers.insert(container_id.into(), container);
    }

    pub fn sessions(&self) -> Arc<dyn SessionDirectory> {
        Arc::clone(&self.sessions)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_info(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.get(room_id).map(Meeting::room_info)
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    /// Among the live sessions owned by `identity` (restricted to `allowed`
    /// ids when given), the most recently created one wins.
    pub fn get_session_for_identity(
        &self,
        identity: &str,
        allowed: Option<&HashSet<String>>,
    ) -> Option<Session> {
        let mut candidates: Vec<Session> = self
            .sessions
            .sessions_for_owner(identity)
            .into_iter()
            .filter(|s| allowed.map_or(true, |ids| ids.contains(&s.id)))
            .collect();
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.pop()
    }

    /// Route a message into a room; missing or inactive rooms swallow it
    pub async fn post_message_to_room(&mut self, room_id: &str, msg: MessageRecord) -> bool {
        let handled = match self.rooms.get_mut(room_id) {
            Some(meeting) if meeting.is_active() => {
                meeting.post_message(msg, &mut self.transcripts)
            }
            Some(_) => {
                debug!("room {} inactive, message dropped", room_id);
                false
            }
            None => {
                debug!("no active room {}, message dropped", room_id);
                false
            }
        };
        self.flush_transcripts().await;
        handled
    }

    /// Release a held message in a moderated room
    pub async fn approve_message(&mut self, room_id: &str, message_id: &str) -> bool {
        let handled = match self.rooms.get_mut(room_id) {
            Some(meeting) => meeting.approve_message(message_id, &mut self.transcripts),
            None => false,
        };
        self.flush_transcripts().await;
        handled
    }

    /// Flip a room's moderation flag; on becoming moderated, `moderator` is
    /// granted moderation rights. Returns whether anything changed.
    pub fn set_room_moderated(&mut self, room_id: &str, flag: bool, moderator: &str) -> bool {
        let Some(meeting) = self.rooms.get_mut(room_id) else {
            debug!("no room {} to toggle moderation on", room_id);
            return false;
        };
        let changed = meeting.set_moderated(flag);
        if changed && flag {
            meeting.add_moderator(moderator);
        }
        changed
    }

    /// Shadow an identity in a room; only effective while the room is moderated
    pub fn shadow_user(&mut self, room_id: &str, identity: &str) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(meeting) if meeting.is_moderated() => meeting.shadow_identity(identity),
            Some(_) => {
                debug!("room {} not moderated, {} not shadowed", room_id, identity);
                false
            }
            None => {
                debug!("no room {} to shadow {} in", room_id, identity);
                false
            }
        }
    }

    /// Enter the meeting hosted by the request's container, creating one when
    /// the container declines to offer an active meeting. Creation is
    /// attempted exactly once.
    pub fn enter_meeting_in_container(
        &mut self,
        request: &mut RoomRequest,
        requester_session: &str,
    ) -> Option<RoomInfo> {
        let container_id = request.container_id.clone()?;
        let Some(container) = self.containers.get(&container_id).cloned() else {
            debug!("container {} does not host meetings", container_id);
            return None;
        };
        if let Some(room_id) = container.enter_active_meeting(request) {
            if let Some(meeting) = self.rooms.get_mut(&room_id) {
                meeting.add_occupant(requester_session, true);
                return Some(meeting.room_info());
            }
            debug!("container {} pointed at unknown room {}", container_id, room_id);
        }
        // The container declined; creation is attempted exactly once. A bare
        // container request names no occupants, so the requester seeds the
        // room unless the container rosters it differently.
        if request.occupants.is_empty() {
            if let Some(session) = self.sessions.get_session(requester_session) {
                request
                    .occupants
                    .push(OccupantRef::pinned(session.owner, session.id));
            }
        }
        self.create_room_from_dict(request)
    }

    /// Create a room from a request. A named container gets first refusal; a
    /// room with zero resolvable occupants is never created.
    pub fn create_room_from_dict(&mut self, request: &mut RoomRequest) -> Option<RoomInfo> {
        let sessions = Arc::clone(&self.sessions);
        let limits = (
            self.config.max_room_occupants,
            self.config.max_pending_messages,
        );
        let make = move |req: &RoomRequest| {
            Meeting::new(Arc::clone(&sessions), req.container_id.clone())
                .with_limits(limits.0, limits.1)
        };

        let container = request
            .container_id
            .as_ref()
            .and_then(|cid| self.containers.get(cid).cloned());
        let mut meeting = match container {
            Some(container) => {
                let mut meeting = container.create_meeting(request, &make)?;
                // The container's named occupants always receive transcripts,
                // whether or not they are online right now
                for occupant in &request.occupants {
                    meeting.add_transcript_recipient(&occupant.name);
                }
                meeting
            }
            None => make(request),
        };

        let mut resolved: Vec<String> = Vec::new();
        for occupant in &request.occupants {
            let allowed = occupant
                .session_id
                .as_ref()
                .map(|sid| HashSet::from([sid.clone()]));
            match self.get_session_for_identity(&occupant.name, allowed.as_ref()) {
                Some(session) => resolved.push(session.id),
                None => debug!("occupant {} has no live session", occupant.name),
            }
        }
        if resolved.is_empty() {
            info!(
                "room for container {:?} not created: no resolvable occupants",
                request.container_id
            );
            return None;
        }

        meeting.add_occupants(resolved);
        let room = meeting.room_info();
        info!(
            "created room {} in container {:?} with {} occupants",
            meeting.id(),
            meeting.container_id(),
            meeting.occupant_count()
        );
        self.rooms.insert(meeting.id().to_string(), meeting);
        Some(room)
    }

    /// Remove an occupant. A drained meeting is deactivated, its container is
    /// offered a revival, and it is dropped from the registry if still
    /// inactive; transcripts keep their own copies regardless.
    pub fn exit_meeting(&mut self, room_id: &str, session_id: &str) -> bool {
        let Some(meeting) = self.rooms.get_mut(room_id) else {
            debug!("no room {} to exit", room_id);
            return false;
        };
        let removed = meeting.remove_occupant(session_id);
        if meeting.occupant_count() == 0 {
            meeting.deactivate();
            if let Some(container_id) = meeting.container_id().map(str::to_string) {
                if let Some(container) = self.containers.get(&container_id).cloned() {
                    container.meeting_became_empty(meeting);
                }
            }
            if !meeting.is_active() {
                info!("room {} drained, dropped from registry", room_id);
                self.rooms.remove(room_id);
            }
        }
        removed
    }

    /// Append a message to the transcript of every resolved session recipient
    /// and every extra identity, then commit durably.
    pub async fn save_message_to_transcripts(
        &mut self,
        msg: &MessageRecord,
        session_recipients: &HashSet<String>,
        extra_identity_recipients: &HashSet<String>,
    ) {
        let Some(room_id) = msg.container_id.clone() else {
            debug!("message {:?} has no room, not transcripted", msg.id);
            return;
        };
        let mut owners = extra_identity_recipients.clone();
        for sid in session_recipients {
            if let Some(session) = self.sessions.get_session(sid) {
                owners.insert(session.owner);
            }
        }
        self.transcripts.save_message(&room_id, msg, &owners);
        self.flush_transcripts().await;
    }

    async fn flush_transcripts(&mut self) {
        for batch in self.transcripts.drain_outbox() {
            if let Err(e) = self.archiver.commit(&batch).await {
                error!("transcript commit failed for room {}: {}", batch.room_id, e);
            }
        }
    }
}

/// Shared reference to the meeting registry
pub type SharedRegistry = Arc<RwLock<MeetingRegistry>>;

/// Create a new thread-safe meeting registry
pub fn create_registry(
    sessions: Arc<dyn SessionDirectory>,
    archiver: Arc<dyn TranscriptArchiver>,
) -> SharedRegistry {
    Arc::new(RwLock::new(MeetingRegistry::new(sessions, archiver)))
}
