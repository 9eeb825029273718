//! The orchestrator core: room lifecycle, matchmaking, deposit
//! reconciliation and pot arithmetic.

pub(crate) mod actor;
pub mod monitor;
pub mod payout;
pub mod queue;
pub mod rooms;

pub use monitor::DepositMonitor;
pub use queue::{QueueManager, RoomAssignment};
pub use rooms::{RoomEvent, RoomManager};
