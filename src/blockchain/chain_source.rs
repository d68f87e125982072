//! Height <-> identity capability shared by the in-memory index and the
//! block database, and the range query built on top of it.

use crate::blockchain::BlockHash;

/// Most ids reserved up front for a range read; larger ranges grow as rows arrive.
pub const RANGE_PREALLOC_LIMIT: u32 = 4096;

/// A height-ordered view of the accepted chain.
///
/// `BlockIndex` implements this with `Error = Infallible`; every
/// `BlockStorage` implements it with backend failures surfaced as errors.
pub trait ChainSource {
    type Error;

    /// Number of heights the source covers, i.e. tip height + 1.
    fn chain_len(&self) -> Result<u32, Self::Error>;

    fn height_of(&self, id: &BlockHash) -> Result<Option<u32>, Self::Error>;

    fn id_at(&self, height: u32) -> Result<Option<BlockHash>, Self::Error>;

    /// Ids for `start..start + count`, stopping early at the first missing height.
    /// Callers have already clipped `count` to `chain_len`.
    fn ids_in_range(&self, start: u32, count: u32) -> Result<Vec<BlockHash>, Self::Error> {
        let mut ids = Vec::with_capacity(count.min(RANGE_PREALLOC_LIMIT) as usize);
        for height in start..start.saturating_add(count) {
            match self.id_at(height)? {
                Some(id) => ids.push(id),
                None => break,
            }
        }
        Ok(ids)
    }
}

/// Up to `max_count` ids starting at `start_height`, in height order.
///
/// A start at or past the tip is not an error, it yields an empty list.
pub fn block_ids<S: ChainSource + ?Sized>(source: &S, start_height: u32, max_count: u32) -> Result<Vec<BlockHash>, S::Error> {
    let len = source.chain_len()?;
    if start_height >= len {
        return Ok(Vec::new());
    }
    let count = max_count.min(len - start_height);
    let ids = source.ids_in_range(start_height, count)?;
    if ids.len() < count as usize {
        log::warn!("Block source reported {} blocks but range {}+{} stopped after {}", len, start_height, count, ids.len());
    }
    Ok(ids)
}

pub(crate) fn into_ok<T>(result: Result<T, std::convert::Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
