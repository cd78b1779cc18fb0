//! Core functionality of the meeting engine

pub mod container;
pub mod events;
pub mod handler;
pub mod meeting;
pub mod message;
pub mod registry;
pub mod session;

// Re-export main components for convenience
pub use container::{MeetingContainer, SingleMeetingContainer};
pub use events::{ClientRequest, OccupantRef, RoomEvent, RoomInfo, RoomRequest};
pub use handler::SessionHandler;
pub use meeting::{Meeting, RoomMode};
pub use message::{Channel, MessageRecord, MessageStatus};
pub use registry::{create_registry, MeetingRegistry, SharedRegistry};
pub use session::{create_session_manager, Session, SessionDirectory, SessionManager};
