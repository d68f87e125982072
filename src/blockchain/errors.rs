use thiserror::Error;

use crate::blockchain::BlockHash;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Positional lookup past the end of the index.
    #[error("height {height} out of range (index holds {len} blocks)")]
    OutOfRange { height: u32, len: u32 },

    #[error("block index is empty")]
    EmptyIndex,

    /// Identity unknown to the queried source.
    #[error("block id not found: {0}")]
    NotFound(String),

    /// The source reports a chain length that covers `height` but has no id stored there.
    #[error("no block id stored at height {0}")]
    MissingHeight(u32),

    #[error("block id {} already indexed at height {height}", hex::encode(.id))]
    DuplicateBlockId { id: BlockHash, height: u32 },

    /// The external block database failed. Kept apart from `NotFound` on purpose.
    #[error("block database failure: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed serialized index.
    #[error("invalid index format: {0}")]
    Format(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<std::convert::Infallible> for IndexError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
