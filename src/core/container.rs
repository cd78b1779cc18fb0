//! Meeting container collaborator interface
//!
//! A container is an external space (a class section, a friends list) that
//! hosts meetings and governs who may create or join them. The engine only
//! sees this narrow callback surface.

use std::sync::Mutex;

use log::debug;

use crate::core::events::RoomRequest;
use crate::core::meeting::Meeting;

/// Callbacks a hosting space must implement.
///
/// Note: nothing synchronizes an implementation's view of "active meeting"
/// against concurrent create requests; two simultaneous joiners that each miss
/// the other's new room can still end up with duplicate rooms. That is
/// long-standing observable behavior, kept as-is.
pub trait MeetingContainer: Send + Sync {
    /// Id of a meeting a caller may join right now, or None to decline
    fn enter_active_meeting(&self, request: &RoomRequest) -> Option<String>;

    /// First refusal on creation. Implementations may amend the request's
    /// occupant list, build the meeting with `make` and keep a reference to
    /// it; returning None vetoes the creation outright.
    fn create_meeting(
        &self,
        request: &mut RoomRequest,
        make: &dyn Fn(&RoomRequest) -> Meeting,
    ) -> Option<Meeting>;

    /// The last occupant left. Implementations may revive the meeting by
    /// re-adding occupants or calling `Meeting::reactivate`; otherwise it is
    /// dropped from the registry.
    fn meeting_became_empty(&self, meeting: &mut Meeting);
}

/// Reference container hosting at most one active meeting; joiners share it
#[derive(Default)]
pub struct SingleMeetingContainer {
    active_room: Mutex<Option<String>>,
}

impl SingleMeetingContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_room(&self) -> Option<String> {
        self.active_room
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl MeetingContainer for SingleMeetingContainer {
    fn enter_active_meeting(&self, _request: &RoomRequest) -> Option<String> {
        self.active_room()
    }

    fn create_meeting(
        &self,
        request: &mut RoomRequest,
        make: &dyn Fn(&RoomRequest) -> Meeting,
    ) -> Option<Meeting> {
        let meeting = make(request);
        let mut active = self.active_room.lock().unwrap_or_else(|e| e.into_inner());
        *active = Some(meeting.id().to_string());
        Some(meeting)
    }

    fn meeting_became_empty(&self, meeting: &mut Meeting) {
        let mut active = self.active_room.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_deref() == Some(meeting.id()) {
            debug!("container meeting {} drained", meeting.id());
            *active = None;
        }
    }
}
