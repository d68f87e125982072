//! Sparse chains (block locators) and supplement lookup.
//!
//! A sparse chain samples the accepted chain at exponentially growing
//! distances below a start block and always ends at genesis, so two nodes
//! can find their most recent common block in a logarithmic number of
//! round trips.

use crate::blockchain::chain_source::ChainSource;
use crate::blockchain::errors::IndexError;
use crate::blockchain::BlockHash;
use crate::util::short_hash;

/// Heights sampled for a sparse chain starting at `start_height`.
///
/// With `end = start_height + 1` the samples are `end - i` for
/// `i = 1, 2, 4, 8, ...` while `i <= end`, followed by 0 when the last sample
/// is not already genesis.
pub fn sparse_chain_heights(start_height: u32) -> Vec<u32> {
    // u64 keeps `step` from overflowing when start_height is u32::MAX.
    let end = u64::from(start_height) + 1;
    let mut heights = Vec::with_capacity(34);
    let mut step = 1u64;
    while step <= end {
        heights.push((end - step) as u32);
        step <<= 1;
    }
    if heights.last() != Some(&0) {
        heights.push(0);
    }
    heights
}

/// Height of the first id in `ids` (in the order given) that `source` knows.
///
/// Unknown candidates are skipped; `Ok(None)` means none of them is known.
pub fn find_supplement<S: ChainSource + ?Sized>(source: &S, ids: &[BlockHash]) -> Result<Option<u32>, S::Error> {
    for id in ids {
        if let Some(height) = source.height_of(id)? {
            log::debug!("Supplement found: {} at height {}", short_hash(id), height);
            return Ok(Some(height));
        }
    }
    log::debug!("No supplement among {} candidate ids", ids.len());
    Ok(None)
}

/// Sparse chain from `start_id` back to genesis, most recent first.
///
/// `start_id` must be known to `source`, otherwise `NotFound`.
pub fn build_sparse_chain<S>(source: &S, start_id: &BlockHash) -> Result<Vec<BlockHash>, IndexError>
where
    S: ChainSource + ?Sized,
    IndexError: From<S::Error>,
{
    let start_height = source
        .height_of(start_id)?
        .ok_or_else(|| IndexError::NotFound(hex::encode(start_id)))?;

    let heights = sparse_chain_heights(start_height);
    let mut chain = Vec::with_capacity(heights.len());
    for height in heights {
        let id = source.id_at(height)?.ok_or(IndexError::MissingHeight(height))?;
        chain.push(id);
    }
    log::debug!("Built sparse chain of {} ids from {} at height {}", chain.len(), short_hash(start_id), start_height);
    Ok(chain)
}
