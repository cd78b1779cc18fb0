// Engine tuning defaults
pub const DEFAULT_MAX_ROOM_OCCUPANTS: usize = 256;
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 128;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024;
