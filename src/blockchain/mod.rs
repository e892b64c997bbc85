pub mod block;
pub mod chain;
pub mod mempool;
pub mod traits;
pub mod transaction;

pub use block::Block;
pub use chain::{AddressData, Chain};
pub use mempool::Mempool;
pub use traits::{ChainReader, ChainWriter};
pub use transaction::{Transaction, TransactionId};
