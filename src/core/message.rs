//! Chat message entity and the channel/status vocabulary

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Routing lanes with distinct permission and fan-out rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "WHISPER")]
    Whisper,
    #[serde(rename = "CONTENT")]
    Content,
    #[serde(rename = "POLL")]
    Poll,
    #[serde(rename = "META")]
    Meta,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Default,
        Channel::Whisper,
        Channel::Content,
        Channel::Poll,
        Channel::Meta,
    ];

    /// Resolve a wire name to a channel; unknown names have no handler
    pub fn from_name(name: &str) -> Option<Channel> {
        match name {
            "DEFAULT" => Some(Channel::Default),
            "WHISPER" => Some(Channel::Whisper),
            "CONTENT" => Some(Channel::Content),
            "POLL" => Some(Channel::Poll),
            "META" => Some(Channel::Meta),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Default => "DEFAULT",
            Channel::Whisper => "WHISPER",
            Channel::Content => "CONTENT",
            Channel::Poll => "POLL",
            Channel::Meta => "META",
        }
    }
}

/// Message lifecycle states; a message only ever advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageStatus {
    #[default]
    #[serde(rename = "INITIAL")]
    Initial,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "POSTED")]
    Posted,
    #[serde(rename = "SHADOWED")]
    Shadowed,
}

impl MessageStatus {
    // SHADOWED outranks POSTED so shadow marking survives routing
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Initial => 0,
            MessageStatus::Pending => 1,
            MessageStatus::Posted => 2,
            MessageStatus::Shadowed => 3,
        }
    }
}

fn default_channel_name() -> String {
    Channel::Default.as_str().to_string()
}

/// One chat message: its channel, status, sender and recipients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Durable identity; assigned on first storage need
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sender identity, stamped by the owning session handler
    #[serde(default)]
    pub creator: String,
    /// Sending session; present only until the first routing pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_session: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_modified: DateTime<Utc>,
    /// The meeting this message was accepted into; set exactly once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default = "default_channel_name")]
    pub channel: String,
    /// Opaque payload
    #[serde(default)]
    pub body: Value,
    /// Target identities; empty means everyone in the room
    #[serde(default)]
    pub recipients: HashSet<String>,
    #[serde(default)]
    pub status: MessageStatus,
    /// Identities that received a durable copy
    #[serde(default)]
    pub shared_with: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// Destination rooms as named by the client
    #[serde(default)]
    pub rooms: Vec<String>,
}

impl MessageRecord {
    /// Create a message on the given channel with an opaque body
    pub fn new(channel: Channel, body: Value) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            creator: String::new(),
            sender_session: None,
            created_at: now,
            last_modified: now,
            container_id: None,
            channel: channel.as_str().to_string(),
            body,
            recipients: HashSet::new(),
            status: MessageStatus::Initial,
            shared_with: HashSet::new(),
            in_reply_to: None,
            rooms: Vec::new(),
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        Channel::from_name(&self.channel)
    }

    /// Default-channel detection treats unknown channel names as DEFAULT
    pub fn is_default_channel(&self) -> bool {
        matches!(self.channel(), None | Some(Channel::Default))
    }

    /// Assign a durable identity if the message does not have one yet
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
        self.id.as_deref().unwrap_or_default()
    }

    /// Record the accepting meeting; later calls are no-ops
    pub fn attach_to(&mut self, room_id: &str) {
        if self.container_id.is_none() {
            self.container_id = Some(room_id.to_string());
        }
    }

    /// Advance the status; regressions are ignored
    pub fn advance_status(&mut self, next: MessageStatus) {
        if next.rank() >= self.status.rank() {
            self.status = next;
            self.last_modified = Utc::now();
        }
    }

    pub fn recipients_without_creator(&self) -> HashSet<String> {
        self.recipients
            .iter()
            .filter(|r| **r != self.creator)
            .cloned()
            .collect()
    }

    pub fn recipients_with_creator(&self) -> HashSet<String> {
        let mut all = self.recipients.clone();
        all.insert(self.creator.clone());
        all
    }
}

/// Syntactic check for content references of the shape `tag:authority,date:specific`
pub fn is_valid_content_ref(value: &str) -> bool {
    match value.strip_prefix("tag:") {
        Some(rest) => {
            !rest.is_empty()
                && !rest.chars().any(char::is_whitespace)
                && rest.contains(',')
                && rest.contains(':')
        }
        None => false,
    }
}

/// Extract a valid content reference from a message body, if present
pub fn content_ref(body: &Value) -> Option<&str> {
    body.as_object()?
        .get("ntiid")?
        .as_str()
        .filter(|s| is_valid_content_ref(s))
}
