pub mod block_index;
pub mod chain_source;
pub mod errors;
pub mod locator;
pub mod serialization;

/// Block identity: the 32-byte header hash.
pub type BlockHash = [u8; 32];

pub use block_index::BlockIndex;
pub use chain_source::ChainSource;
pub use errors::{IndexError, IndexResult};
