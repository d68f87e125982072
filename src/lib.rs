pub mod blockchain;
pub mod codec;
pub mod inspect;
pub mod settings;
pub mod storage;
pub mod util;

pub use blockchain::{BlockHash, BlockIndex, ChainSource, IndexError, IndexResult};
pub use storage::{BlockStorage, SqliteBlockStorage};
