pub mod api;
pub mod gossip;
pub mod peer;
pub mod sync;

pub use gossip::Gossiper;
pub use peer::PeerSet;
pub use sync::{SyncManager, SyncScheduler};
