//! External collaborators behind narrow interfaces: the chain RPC boundary,
//! the wallet gateway, and the durable room store.

pub mod chain;
pub mod store;
pub mod wallet;

pub use chain::{ChainRpc, ChainWatcher, SimulatedChain};
pub use store::{MemoryStore, RoomStore};
pub use wallet::WalletGateway;
