//! Meeting state machine: occupancy, channel routing and moderation
//!
//! A meeting is either open or moderated. Moderation is a runtime mode with
//! its own payload (moderators, shadowed identities, the pending-approval
//! queue); leaving the mode drops the payload wholesale, so no moderation
//! state survives into an open room.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{DEFAULT_MAX_PENDING_MESSAGES, DEFAULT_MAX_ROOM_OCCUPANTS};
use crate::core::events::{RoomEvent, RoomInfo};
use crate::core::message::{content_ref, is_valid_content_ref, Channel, MessageRecord, MessageStatus};
use crate::core::session::SessionDirectory;
use crate::storage::transcript::TranscriptStore;

/// Moderation-mode payload; exists only while a meeting is moderated
#[derive(Default)]
pub struct ModerationState {
    /// Sessions granted moderation rights
    moderators: HashSet<String>,
    /// Identities whose private messages are copied to moderators
    shadowed: HashSet<String>,
    /// Messages awaiting approval, by message id
    pending: HashMap<String, MessageRecord>,
}

/// Current mode of a meeting
pub enum RoomMode {
    Open,
    Moderated(ModerationState),
}

/// A chat room: the unit of message routing and occupancy
pub struct Meeting {
    id: String,
    container_id: Option<String>,
    active: bool,
    message_count: u64,
    created_at: DateTime<Utc>,
    /// Session ids currently in the room
    occupants: HashSet<String>,
    /// Identities that always receive a transcript copy
    transcript_recipients: HashSet<String>,
    mode: RoomMode,
    max_occupants: usize,
    max_pending: usize,
    sessions: Arc<dyn SessionDirectory>,
}

impl Meeting {
    /// Create an active, unmoderated meeting
    pub fn new(sessions: Arc<dyn SessionDirectory>, container_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            container_id,
            active: true,
            message_count: 0,
            created_at: Utc::now(),
            occupants: HashSet::new(),
            transcript_recipients: HashSet::new(),
            mode: RoomMode::Open,
            max_occupants: DEFAULT_MAX_ROOM_OCCUPANTS,
            max_pending: DEFAULT_MAX_PENDING_MESSAGES,
            sessions,
        }
    }

    /// Apply occupancy and pending-queue limits
    pub fn with_limits(mut self, max_occupants: usize, max_pending: usize) -> Self {
        self.max_occupants = max_occupants;
        self.max_pending = max_pending;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Containers may revive a drained meeting before it is dropped
    pub fn reactivate(&mut self) {
        self.active = true;
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn has_occupant(&self, session_id: &str) -> bool {
        self.occupants.contains(session_id)
    }

    pub fn occupant_sessions(&self) -> Vec<String> {
        self.occupants.iter().cloned().collect()
    }

    /// Mark an identity that receives every transcript, online or not
    pub fn add_transcript_recipient(&mut self, identity: &str) {
        self.transcript_recipients.insert(identity.to_string());
    }

    /// Room-info projection shown to clients
    pub fn room_info(&self) -> RoomInfo {
        let mut occupants: Vec<String> = self
            .occupants
            .iter()
            .filter_map(|sid| self.sessions.get_session(sid).map(|s| s.owner))
            .collect();
        occupants.sort();
        occupants.dedup();
        RoomInfo {
            id: self.id.clone(),
            container_id: self.container_id.clone(),
            moderated: self.is_moderated(),
            active: self.active,
            occupants,
            message_count: self.message_count,
            created_at: self.created_at,
        }
    }

    // ---- moderation mode -------------------------------------------------

    pub fn is_moderated(&self) -> bool {
        matches!(self.mode, RoomMode::Moderated(_))
    }

    /// Flip the moderation flag. Re-entrant calls are no-ops and emit nothing.
    pub fn set_moderated(&mut self, flag: bool) -> bool {
        match (&self.mode, flag) {
            (RoomMode::Open, true) => {
                self.mode = RoomMode::Moderated(ModerationState::default());
                info!("room {} is now moderated", self.id);
            }
            (RoomMode::Moderated(_), false) => {
                self.mode = RoomMode::Open;
                info!("room {} is no longer moderated", self.id);
            }
            _ => return false,
        }
        let event = RoomEvent::RoomModerationChanged {
            room: self.room_info(),
        };
        self.emit_to(event, self.occupants.iter());
        true
    }

    /// Grant moderation rights to a session; a no-op in an open room
    pub fn add_moderator(&mut self, session_id: &str) -> bool {
        match &mut self.mode {
            RoomMode::Moderated(state) => state.moderators.insert(session_id.to_string()),
            RoomMode::Open => {
                debug!("room {} is not moderated; {} not promoted", self.id, session_id);
                false
            }
        }
    }

    pub fn is_moderated_by(&self, session_id: &str) -> bool {
        match &self.mode {
            RoomMode::Moderated(state) => state.moderators.contains(session_id),
            RoomMode::Open => false,
        }
    }

    /// Copy future private traffic involving `identity` to moderators
    pub fn shadow_identity(&mut self, identity: &str) -> bool {
        match &mut self.mode {
            RoomMode::Moderated(state) => state.shadowed.insert(identity.to_string()),
            RoomMode::Open => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        match &self.mode {
            RoomMode::Moderated(state) => state.pending.len(),
            RoomMode::Open => 0,
        }
    }

    pub fn has_pending(&self, message_id: &str) -> bool {
        match &self.mode {
            RoomMode::Moderated(state) => state.pending.contains_key(message_id),
            RoomMode::Open => false,
        }
    }

    fn moderator_sessions(&self) -> HashSet<String> {
        match &self.mode {
            RoomMode::Moderated(state) => state.moderators.clone(),
            RoomMode::Open => HashSet::new(),
        }
    }

    fn moderator_identities(&self) -> HashSet<String> {
        self.moderator_sessions()
            .iter()
            .filter_map(|sid| self.sessions.get_session(sid).map(|s| s.owner))
            .collect()
    }

    // ---- occupancy -------------------------------------------------------

    /// Add one occupant. Adding a present occupant is a no-op.
    pub fn add_occupant(&mut self, session_id: &str, broadcast: bool) -> bool {
        if self.occupants.contains(session_id) {
            return false;
        }
        if self.sessions.get_session(session_id).is_none() {
            warn!("session {} unknown, not admitted to room {}", session_id, self.id);
            return false;
        }
        if self.occupants.len() >= self.max_occupants {
            warn!("room {} full, session {} not admitted", self.id, session_id);
            return false;
        }
        let others: Vec<String> = self.occupants.iter().cloned().collect();
        self.occupants.insert(session_id.to_string());
        self.active = true;
        if broadcast {
            let room = self.room_info();
            self.emit_to(RoomEvent::EnteredRoom { room: room.clone() }, [session_id]);
            self.emit_to(RoomEvent::RoomMembershipChanged { room }, others.iter());
        }
        true
    }

    /// Bulk addition: one EnteredRoom to the new occupants and one
    /// RoomMembershipChanged to the prior ones, never per-occupant events.
    pub fn add_occupants<I>(&mut self, session_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let prior: Vec<String> = self.occupants.iter().cloned().collect();
        let mut fresh: Vec<String> = Vec::new();
        for sid in session_ids {
            if self.occupants.contains(&sid) || fresh.contains(&sid) {
                continue;
            }
            if self.sessions.get_session(&sid).is_none() {
                warn!("session {} unknown, not admitted to room {}", sid, self.id);
                continue;
            }
            if self.occupants.len() + fresh.len() >= self.max_occupants {
                warn!("room {} full, session {} not admitted", self.id, sid);
                continue;
            }
            fresh.push(sid);
        }
        if fresh.is_empty() {
            return 0;
        }
        for sid in &fresh {
            self.occupants.insert(sid.clone());
        }
        self.active = true;
        let room = self.room_info();
        self.emit_to(RoomEvent::EnteredRoom { room: room.clone() }, fresh.iter());
        self.emit_to(RoomEvent::RoomMembershipChanged { room }, prior.iter());
        fresh.len()
    }

    /// Remove one occupant. Removing an absent occupant is a no-op.
    pub fn remove_occupant(&mut self, session_id: &str) -> bool {
        if !self.occupants.remove(session_id) {
            return false;
        }
        let room = self.room_info();
        self.emit_to(RoomEvent::ExitedRoom { room: room.clone() }, [session_id]);
        self.emit_to(RoomEvent::RoomMembershipChanged { room }, self.occupants.iter());
        true
    }

    // ---- posting ---------------------------------------------------------

    /// Route one message according to the current mode. Returns whether the
    /// message was handled; a dropped message is a routing decision, not an
    /// error.
    pub fn post_message(&mut self, msg: MessageRecord, transcripts: &mut TranscriptStore) -> bool {
        if !self.active {
            debug!("room {} inactive, message dropped", self.id);
            return false;
        }
        if self.is_moderated() {
            self.post_moderated(msg, transcripts)
        } else {
            self.post_open(msg, transcripts)
        }
    }

    fn post_open(&mut self, msg: MessageRecord, transcripts: &mut TranscriptStore) -> bool {
        match Channel::from_name(&msg.channel) {
            Some(Channel::Default) | Some(Channel::Whisper) => self.route(msg, transcripts),
            _ => {
                debug!(
                    "channel {} not accepted in open room {}, message dropped",
                    msg.channel, self.id
                );
                false
            }
        }
    }

    fn post_moderated(&mut self, mut msg: MessageRecord, transcripts: &mut TranscriptStore) -> bool {
        let Some(channel) = Channel::from_name(&msg.channel) else {
            debug!("no handler for channel {} in room {}", msg.channel, self.id);
            return false;
        };
        let sender_is_moderator = msg
            .sender_session
            .as_deref()
            .map_or(false, |sid| self.is_moderated_by(sid));

        match channel {
            // Moderators speak directly on the conversational channels
            Channel::Default if sender_is_moderator => self.route(msg, transcripts),
            Channel::Default => self.enqueue_for_approval(msg),

            Channel::Whisper if sender_is_moderator => self.route(msg, transcripts),
            Channel::Whisper => {
                let others = msg.recipients_without_creator();
                if others.is_empty() && !msg.recipients.is_empty() {
                    debug!("whisper addressed only to its sender dropped");
                    return false;
                }
                // A whisper blanketing the room is DEFAULT traffic in disguise
                // and goes through the approval queue; a genuine one-on-one
                // whisper passes even when only one other occupant is present.
                if others.len() > 1 && self.is_to_everyone(&self.recipient_sessions(&msg)) {
                    return self.enqueue_for_approval(msg);
                }
                let permitted =
                    others.len() == 1 || others.is_subset(&self.moderator_identities());
                if !permitted {
                    debug!(
                        "whisper from {} in room {} not permitted, dropped",
                        msg.creator, self.id
                    );
                    return false;
                }
                if self.touches_shadowed(&msg) {
                    msg.advance_status(MessageStatus::Shadowed);
                    msg.ensure_id();
                    self.deliver_shadow_copy(&mut msg, transcripts);
                }
                self.route(msg, transcripts)
            }

            Channel::Content => {
                if !sender_is_moderator {
                    debug!("CONTENT from non-moderator {} dropped", msg.creator);
                    return false;
                }
                let Some(reference) = content_ref(&msg.body).map(str::to_string) else {
                    debug!("CONTENT body without valid reference dropped");
                    return false;
                };
                // Only the reference survives; everything else is stripped
                msg.body = json!({ "ntiid": reference });
                msg.recipients.clear();
                self.route(msg, transcripts)
            }

            Channel::Meta => {
                if !sender_is_moderator {
                    debug!("META from non-moderator {} dropped", msg.creator);
                    return false;
                }
                self.handle_meta(msg, transcripts)
            }

            Channel::Poll => {
                if sender_is_moderator {
                    msg.recipients.clear();
                    return self.route(msg, transcripts);
                }
                if msg.in_reply_to.is_none() {
                    debug!("POLL from {} is not a reply, dropped", msg.creator);
                    return false;
                }
                // Answers go only to the moderators
                msg.recipients = self.moderator_identities();
                self.route(msg, transcripts)
            }
        }
    }

    fn handle_meta(&mut self, mut msg: MessageRecord, transcripts: &mut TranscriptStore) -> bool {
        let Some(body) = msg.body.as_object().cloned() else {
            debug!("META body is not an object, dropped");
            return false;
        };
        let Some(target) = body
            .get("channel")
            .and_then(Value::as_str)
            .and_then(Channel::from_name)
        else {
            debug!("META body without known channel dropped");
            return false;
        };
        let Some(action) = body.get("action").and_then(Value::as_str).map(str::to_string) else {
            debug!("META body without action dropped");
            return false;
        };
        if action != "pin" && action != "clearPinned" {
            debug!("META action {} unknown, dropped", action);
            return false;
        }
        match action.as_str() {
            "pin" => {
                let Some(reference) = body
                    .get("ntiid")
                    .and_then(Value::as_str)
                    .filter(|s| is_valid_content_ref(s))
                else {
                    debug!("META pin without valid reference dropped");
                    return false;
                };
                msg.body = json!({ "channel": target.as_str(), "action": action, "ntiid": reference });
            }
            "clearPinned" => {
                msg.body = json!({ "channel": target.as_str(), "action": action });
            }
            // The validation above and this dispatch must agree on the action set
            other => panic!("META action {} passed validation without a handler", other),
        }
        msg.recipients.clear();
        self.route(msg, transcripts)
    }

    fn enqueue_for_approval(&mut self, mut msg: MessageRecord) -> bool {
        if self.pending_count() >= self.max_pending {
            warn!("room {} approval queue full, message dropped", self.id);
            return false;
        }
        msg.advance_status(MessageStatus::Pending);
        msg.attach_to(&self.id);
        msg.sender_session = None;
        let id = msg.ensure_id().to_string();
        let moderators = self.moderator_sessions();
        if let RoomMode::Moderated(state) = &mut self.mode {
            state.pending.insert(id.clone(), msg.clone());
        }
        debug!("message {} held for approval in room {}", id, self.id);
        self.emit_to(RoomEvent::RecvMessageForModeration { message: msg }, moderators.iter());
        true
    }

    /// Release a held message into normal routing; unknown ids are no-ops
    pub fn approve_message(&mut self, message_id: &str, transcripts: &mut TranscriptStore) -> bool {
        let held = match &mut self.mode {
            RoomMode::Moderated(state) => state.pending.remove(message_id),
            RoomMode::Open => None,
        };
        let Some(mut msg) = held else {
            debug!("no pending message {} in room {}", message_id, self.id);
            return false;
        };
        msg.advance_status(MessageStatus::Posted);
        self.route(msg, transcripts)
    }

    fn touches_shadowed(&self, msg: &MessageRecord) -> bool {
        match &self.mode {
            RoomMode::Moderated(state) => {
                state.shadowed.contains(&msg.creator)
                    || msg.recipients.iter().any(|r| state.shadowed.contains(r))
            }
            RoomMode::Open => false,
        }
    }

    /// Copy a shadowed message to every moderator, durably, ahead of routing
    fn deliver_shadow_copy(&mut self, msg: &mut MessageRecord, transcripts: &mut TranscriptStore) {
        let moderator_identities = self.moderator_identities();
        msg.shared_with.extend(moderator_identities.iter().cloned());
        transcripts.save_message(&self.id, msg, &moderator_identities);
        self.emit_to(
            RoomEvent::RecvMessageForShadow { message: msg.clone() },
            self.moderator_sessions().iter(),
        );
    }

    // ---- common routing --------------------------------------------------

    /// Occupant sessions a message is addressed to
    fn recipient_sessions(&self, msg: &MessageRecord) -> HashSet<String> {
        if msg.is_default_channel() || msg.recipients_without_creator().is_empty() {
            return self.occupants.clone();
        }
        let wanted = msg.recipients_with_creator();
        self.occupants
            .iter()
            .filter(|sid| {
                self.sessions
                    .get_session(sid)
                    .map_or(false, |s| wanted.contains(&s.owner))
            })
            .cloned()
            .collect()
    }

    /// Whether the addressed sessions amount to the whole room. Moderators are
    /// left out of the comparison so a whisper that merely omits them still
    /// counts as addressed to everyone.
    fn is_to_everyone(&self, recipient_sessions: &HashSet<String>) -> bool {
        let moderators = self.moderator_sessions();
        self.occupants
            .iter()
            .filter(|sid| !moderators.contains(*sid))
            .all(|sid| recipient_sessions.contains(sid))
    }

    fn route(&mut self, mut msg: MessageRecord, transcripts: &mut TranscriptStore) -> bool {
        // A targeted message addressed to nobody but its sender goes nowhere
        if !msg.is_default_channel()
            && !msg.recipients.is_empty()
            && msg.recipients_without_creator().is_empty()
        {
            debug!("message from {} addressed only to themselves dropped", msg.creator);
            return false;
        }

        msg.advance_status(MessageStatus::Posted);
        msg.attach_to(&self.id);
        msg.ensure_id();
        // Transient sender session is gone after the first routing pass
        msg.sender_session = None;

        let mut transcript_owners = self.transcript_recipients.clone();
        transcript_owners.insert(msg.creator.clone());

        let recipient_sessions = self.recipient_sessions(&msg);
        let recipient_identities: HashSet<String> = recipient_sessions
            .iter()
            .filter_map(|sid| self.sessions.get_session(sid).map(|s| s.owner))
            .collect();

        msg.shared_with.extend(recipient_identities.iter().cloned());
        msg.shared_with.extend(transcript_owners.iter().cloned());

        if self.is_to_everyone(&recipient_sessions) {
            self.message_count += 1;
            self.emit_to(
                RoomEvent::RecvMessage { message: msg.clone() },
                recipient_sessions.iter(),
            );
        } else {
            for sid in &recipient_sessions {
                self.emit_to(RoomEvent::RecvMessage { message: msg.clone() }, [sid.as_str()]);
            }
        }

        let mut owners = recipient_identities;
        owners.extend(transcript_owners);
        transcripts.save_message(&self.id, &msg, &owners);
        true
    }

    fn emit_to<I, S>(&self, event: RoomEvent, audience: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for sid in audience {
            let sid = sid.as_ref();
            match self.sessions.get_session(sid) {
                Some(session) => {
                    session.send_event(event.clone());
                }
                None => debug!("session {} gone, event not delivered", sid),
            }
        }
    }
}
