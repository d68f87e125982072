// Hash formatting helpers used in log lines and by the binary.
use crate::blockchain::errors::{IndexError, IndexResult};
use crate::blockchain::BlockHash;

/// First 8 bytes as hex, the way block hashes show up in log output.
pub fn short_hash(hash: &BlockHash) -> String {
    hex::encode(&hash[..8])
}

pub fn parse_hash(s: &str) -> IndexResult<BlockHash> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(s.trim(), &mut hash)
        .map_err(|e| IndexError::Format(format!("bad block hash {:?}: {}", s, e)))?;
    Ok(hash)
}
