// Height <-> block id index over the accepted chain.

use std::collections::HashMap;
use std::convert::Infallible;

use crate::blockchain::chain_source::{self, into_ok, ChainSource};
use crate::blockchain::errors::{IndexError, IndexResult};
use crate::blockchain::locator;
use crate::blockchain::BlockHash;
use crate::util::short_hash;

/// Chunk size used when hydrating from a slower source.
const LOAD_BATCH_SIZE: u32 = 10_000;

/// Ordered block ids of the accepted chain plus the reverse lookup.
///
/// `container[h]` is the id at height `h` and `index[container[h]] == h` for
/// every height. The chain only grows or shrinks at the tail: a reorg is a
/// `truncate` followed by fresh `push`es, driven by the owner of chain state.
///
/// Mutating methods take `&mut self`. Holding that exclusive borrow is the
/// caller's access token; there is no internal locking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    container: Vec<BlockHash>,
    index: HashMap<BlockHash, u32>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrates an in-memory index from any source, e.g. the block database.
    pub fn from_source<S>(source: &S) -> IndexResult<Self>
    where
        S: ChainSource + ?Sized,
        IndexError: From<S::Error>,
    {
        // chain_len comes from the source and may be far past the ids it really holds.
        let len = source.chain_len()?;
        let reserve = len.min(LOAD_BATCH_SIZE) as usize;
        let mut block_index = BlockIndex {
            container: Vec::with_capacity(reserve),
            index: HashMap::with_capacity(reserve),
        };
        while block_index.size() < len {
            let start = block_index.size();
            let batch = chain_source::block_ids(source, start, LOAD_BATCH_SIZE)?;
            if batch.is_empty() {
                return Err(IndexError::MissingHeight(start));
            }
            for id in batch {
                block_index.push(id)?;
            }
        }
        log::info!("Loaded block index with {} blocks", block_index.len());
        Ok(block_index)
    }

    /// Appends `id` at the next height and returns that height.
    ///
    /// A duplicate id is rejected and the index is left unchanged.
    pub fn push(&mut self, id: BlockHash) -> IndexResult<u32> {
        if let Some(&height) = self.index.get(&id) {
            log::warn!("Rejected duplicate block id {} (already at height {})", short_hash(&id), height);
            return Err(IndexError::DuplicateBlockId { id, height });
        }
        let height = self.size();
        self.container.push(id);
        self.index.insert(id, height);
        log::debug!("Indexed block {} at height {}", short_hash(&id), height);
        Ok(height)
    }

    /// Removes and returns the tail id.
    pub fn pop(&mut self) -> Option<BlockHash> {
        let id = self.container.pop()?;
        self.index.remove(&id);
        log::debug!("Popped block {} from height {}", short_hash(&id), self.container.len());
        Some(id)
    }

    /// Drops every id at height `>= len`. No-op when the index is already shorter.
    pub fn truncate(&mut self, len: u32) {
        let len = len as usize;
        if len >= self.container.len() {
            return;
        }
        for id in self.container.drain(len..) {
            self.index.remove(&id);
        }
        log::debug!("Truncated block index to {} blocks", len);
    }

    pub fn clear(&mut self) {
        self.container.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    /// Block count as a height type. Heights are u32, so the index never holds more.
    pub fn size(&self) -> u32 {
        self.container.len() as u32
    }

    pub fn has_block(&self, id: &BlockHash) -> bool {
        self.index.contains_key(id)
    }

    pub fn get_block_height(&self, id: &BlockHash) -> Option<u32> {
        self.index.get(id).copied()
    }

    pub fn get_block_id(&self, height: u32) -> IndexResult<BlockHash> {
        self.container
            .get(height as usize)
            .copied()
            .ok_or(IndexError::OutOfRange { height, len: self.size() })
    }

    pub fn get_tail_id(&self) -> IndexResult<BlockHash> {
        self.container.last().copied().ok_or(IndexError::EmptyIndex)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockHash> + '_ {
        self.container.iter()
    }

    pub fn get_block_ids(&self, start_height: u32, max_count: u32) -> Vec<BlockHash> {
        into_ok(chain_source::block_ids(self, start_height, max_count))
    }

    pub fn find_supplement(&self, ids: &[BlockHash]) -> Option<u32> {
        into_ok(locator::find_supplement(self, ids))
    }

    pub fn build_sparse_chain(&self, start_id: &BlockHash) -> IndexResult<Vec<BlockHash>> {
        locator::build_sparse_chain(self, start_id)
    }
}

impl ChainSource for BlockIndex {
    type Error = Infallible;

    fn chain_len(&self) -> Result<u32, Infallible> {
        Ok(self.size())
    }

    fn height_of(&self, id: &BlockHash) -> Result<Option<u32>, Infallible> {
        Ok(self.get_block_height(id))
    }

    fn id_at(&self, height: u32) -> Result<Option<BlockHash>, Infallible> {
        Ok(self.container.get(height as usize).copied())
    }

    fn ids_in_range(&self, start: u32, count: u32) -> Result<Vec<BlockHash>, Infallible> {
        let start = start as usize;
        let end = start.saturating_add(count as usize).min(self.container.len());
        Ok(self.container.get(start..end).map(<[BlockHash]>::to_vec).unwrap_or_default())
    }
}
