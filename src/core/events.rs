//! Inbound request and outbound event types for session transports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::MessageRecord;

/// Occupant named in a room request: an identity, optionally pinned to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupantRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OccupantRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: None,
        }
    }

    pub fn pinned(name: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: Some(session_id.into()),
        }
    }
}

/// Room creation/entry request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub occupants: Vec<OccupantRef>,
    /// Free-form request metadata, passed through to containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

impl RoomRequest {
    pub fn in_container(container_id: impl Into<String>) -> Self {
        Self {
            container_id: Some(container_id.into()),
            ..Self::default()
        }
    }
}

/// What a client sees of a meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub moderated: bool,
    pub active: bool,
    /// Identities currently resolvable from the occupant sessions
    pub occupants: Vec<String>,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Server-to-session event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    /// Sent to occupants that just entered a room
    #[serde(rename = "entered_room")]
    EnteredRoom { room: RoomInfo },

    /// Sent to an occupant that was removed from a room
    #[serde(rename = "exited_room")]
    ExitedRoom { room: RoomInfo },

    /// Sent to remaining occupants when membership changes
    #[serde(rename = "room_membership_changed")]
    RoomMembershipChanged { room: RoomInfo },

    /// Sent to occupants when the moderation flag flips
    #[serde(rename = "room_moderation_changed")]
    RoomModerationChanged { room: RoomInfo },

    /// A routed message, delivered to its recipient sessions
    #[serde(rename = "recv_message")]
    RecvMessage { message: MessageRecord },

    /// A message awaiting approval, delivered to moderators
    #[serde(rename = "recv_message_for_moderation")]
    RecvMessageForModeration { message: MessageRecord },

    /// A shadowed private message, copied to moderators
    #[serde(rename = "recv_message_for_shadow")]
    RecvMessageForShadow { message: MessageRecord },

    /// A message flagged for attention; carries the id only, never content
    #[serde(rename = "recv_message_for_attention")]
    RecvMessageForAttention { message_id: String },

    /// The original request of a room entry that could not be satisfied
    #[serde(rename = "failed_to_enter_room")]
    FailedToEnterRoom { request: RoomRequest },
}

/// Client-to-server request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "post_message")]
    PostMessage { message: MessageRecord },

    #[serde(rename = "enter_room")]
    EnterRoom { request: RoomRequest },

    #[serde(rename = "exit_room")]
    ExitRoom { room_id: String },

    #[serde(rename = "make_moderated")]
    MakeModerated { room_id: String, moderated: bool },

    #[serde(rename = "approve_messages")]
    ApproveMessages { ids: Vec<String> },

    #[serde(rename = "flag_messages_to_users")]
    FlagMessagesToUsers {
        ids: Vec<String>,
        usernames: Vec<String>,
    },

    #[serde(rename = "shadow_users")]
    ShadowUsers {
        room_id: String,
        usernames: Vec<String>,
    },
}
