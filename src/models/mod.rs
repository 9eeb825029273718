//! Domain models: the room aggregate and the WebSocket wire frames.

pub mod frames;
pub mod room;

pub use frames::{ClientFrame, ServerEvent, CLOSE_POLICY_VIOLATION, MAX_FRAME_BYTES};
pub use room::{
    GameMode, Room, RoomSnapshot, RoomState, Round, Seat, CHAMBERS_PER_CYLINDER, MAX_ROOM_ID_LEN,
    PAYOUT_FAILED, SOMPI_PER_KAS,
};
