//! Per-session request handling
//!
//! One handler per connected session. It translates inbound client requests
//! into registry and meeting calls, stamps outgoing messages with the session
//! identity, and remembers which rooms the session occupies or moderates.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::constants::DEFAULT_MAX_MESSAGE_BYTES;
use crate::core::events::{ClientRequest, OccupantRef, RoomEvent, RoomInfo, RoomRequest};
use crate::core::message::MessageRecord;
use crate::core::registry::SharedRegistry;
use crate::core::session::{Session, SessionDirectory};

pub struct SessionHandler {
    registry: SharedRegistry,
    sessions: Arc<dyn SessionDirectory>,
    session_id: String,
    identity: String,
    /// Rooms this session currently occupies
    rooms: HashSet<String>,
    /// Rooms this session moderates
    moderated_rooms: HashSet<String>,
    max_message_bytes: usize,
}

impl SessionHandler {
    pub fn new(
        registry: SharedRegistry,
        sessions: Arc<dyn SessionDirectory>,
        session: &Session,
    ) -> Self {
        Self {
            registry,
            sessions,
            session_id: session.id.clone(),
            identity: session.owner.clone(),
            rooms: HashSet::new(),
            moderated_rooms: HashSet::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.max_message_bytes = config.max_message_bytes;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn rooms(&self) -> &HashSet<String> {
        &self.rooms
    }

    pub fn moderated_rooms(&self) -> &HashSet<String> {
        &self.moderated_rooms
    }

    /// Dispatch one inbound client request
    pub async fn handle(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::PostMessage { message } => {
                self.post_message(message).await;
            }
            ClientRequest::EnterRoom { request } => {
                self.enter_room(request).await;
            }
            ClientRequest::ExitRoom { room_id } => self.exit_room(&room_id).await,
            ClientRequest::MakeModerated { room_id, moderated } => {
                self.make_moderated(&room_id, moderated).await
            }
            ClientRequest::ApproveMessages { ids } => self.approve_messages(&ids).await,
            ClientRequest::FlagMessagesToUsers { ids, usernames } => {
                self.flag_messages_to_users(&ids, &usernames).await
            }
            ClientRequest::ShadowUsers { room_id, usernames } => {
                self.shadow_users(&room_id, &usernames).await
            }
        }
    }

    /// Stamp the message with this session and post it to every distinct room
    /// it names. Returns how many rooms accepted it.
    pub async fn post_message(&self, mut msg: MessageRecord) -> usize {
        let body_len = serde_json::to_string(&msg.body).map(|s| s.len()).unwrap_or(0);
        if body_len > self.max_message_bytes {
            warn!(
                "oversize message from {} rejected: {} bytes",
                self.identity, body_len
            );
            return 0;
        }
        msg.creator = self.identity.clone();
        msg.sender_session = Some(self.session_id.clone());

        let mut seen: HashSet<String> = HashSet::new();
        let mut posted = 0;
        let mut registry = self.registry.write().await;
        for room_id in msg.rooms.clone() {
            if !seen.insert(room_id.clone()) {
                continue;
            }
            if registry.post_message_to_room(&room_id, msg.clone()).await {
                posted += 1;
            }
        }
        posted
    }

    /// Enter (or create) a room. A failure is reported back to this session
    /// as a FailedToEnterRoom event carrying the original request.
    pub async fn enter_room(&mut self, mut request: RoomRequest) -> Option<RoomInfo> {
        let room = self.resolve_enter(&mut request).await;
        match &room {
            Some(info) => {
                self.rooms.insert(info.id.clone());
            }
            None => {
                debug!("session {} failed to enter a room", self.session_id);
                self.emit_to_self(RoomEvent::FailedToEnterRoom { request });
            }
        }
        room
    }

    async fn resolve_enter(&mut self, request: &mut RoomRequest) -> Option<RoomInfo> {
        if request.room_id.is_some() {
            // TODO: support joining an established room by id
            warn!(
                "session {} asked to join room {:?} by id; unsupported",
                self.session_id, request.room_id
            );
            return None;
        }
        let mut registry = self.registry.write().await;
        if request.container_id.is_some() && request.occupants.is_empty() {
            return registry.enter_meeting_in_container(request, &self.session_id);
        }
        // An ad-hoc room always contains its creator; scrub stale references
        // to this identity before pinning it to the live session
        request.occupants.retain(|o| o.name != self.identity);
        request
            .occupants
            .push(OccupantRef::pinned(&self.identity, &self.session_id));
        registry.create_room_from_dict(request)
    }

    /// Leave a room and forget it
    pub async fn exit_room(&mut self, room_id: &str) {
        {
            let mut registry = self.registry.write().await;
            registry.exit_meeting(room_id, &self.session_id);
        }
        self.rooms.remove(room_id);
    }

    /// Toggle a room's moderation flag when it differs from the current
    /// state; becoming moderated registers this session as a moderator
    pub async fn make_moderated(&mut self, room_id: &str, moderated: bool) {
        let changed = {
            let mut registry = self.registry.write().await;
            registry.set_room_moderated(room_id, moderated, &self.session_id)
        };
        if changed {
            if moderated {
                self.moderated_rooms.insert(room_id.to_string());
            } else {
                self.moderated_rooms.remove(room_id);
            }
        }
    }

    /// Approve held messages. The caller does not say which room, so every
    /// room this session moderates is scanned.
    pub async fn approve_messages(&self, ids: &[String]) {
        let mut registry = self.registry.write().await;
        for room_id in &self.moderated_rooms {
            for id in ids {
                registry.approve_message(room_id, id).await;
            }
        }
    }

    /// Point users at messages needing attention; carries ids only
    pub async fn flag_messages_to_users(&self, ids: &[String], usernames: &[String]) {
        let registry = self.registry.read().await;
        for username in usernames {
            match registry.get_session_for_identity(username, None) {
                Some(session) => {
                    for id in ids {
                        session.send_event(RoomEvent::RecvMessageForAttention {
                            message_id: id.clone(),
                        });
                    }
                }
                None => debug!("no live session for {}, attention flag dropped", username),
            }
        }
    }

    /// Shadow users in a room; only effective if the room exists and is moderated
    pub async fn shadow_users(&self, room_id: &str, usernames: &[String]) {
        let mut registry = self.registry.write().await;
        for username in usernames {
            registry.shadow_user(room_id, username);
        }
    }

    /// Leave every room; called when the session disconnects
    pub async fn destroy(&mut self) {
        // Exit mutates the set, so iterate a copy
        let rooms: Vec<String> = self.rooms.iter().cloned().collect();
        for room_id in rooms {
            self.exit_room(&room_id).await;
        }
    }

    fn emit_to_self(&self, event: RoomEvent) {
        if let Some(session) = self.sessions.get_session(&self.session_id) {
            session.send_event(event);
        }
    }
}
