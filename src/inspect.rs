// Snapshot import and the summary printed by the block-index binary.
use std::io::BufReader;

use serde::Serialize;

use crate::blockchain::serialization::{BinaryReader, StorageSnapshot};
use crate::blockchain::{BlockIndex, IndexResult};
use crate::settings::Settings;
use crate::storage::BlockStorage;
use crate::util::short_hash;

#[derive(Debug, Serialize)]
pub struct IndexReport {
    pub blocks: u32,
    pub tip_height: Option<u32>,
    pub tip: Option<String>,
    pub locator: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_ids: Option<Vec<String>>,
}

/// Replaces the database's block ids with the contents of a binary snapshot.
///
/// The id swap is a single transaction. The metadata blob is written after it
/// commits, so a failure at any step leaves a whole chain behind and the
/// import can simply be retried.
pub fn import_snapshot(storage: &dyn BlockStorage, path: &str) -> IndexResult<BlockIndex> {
    let file = std::fs::File::open(path)?;
    let snapshot = BlockIndex::deserialize(&mut BinaryReader::new(BufReader::new(file)))?;
    log::info!("Importing {} block ids from {}", snapshot.len(), path);

    let ids: Vec<_> = snapshot.iter().copied().collect();
    storage.replace_block_ids(&ids)?;
    snapshot.serialize(&mut StorageSnapshot::new(storage))?;

    if let Ok(tip) = snapshot.get_tail_id() {
        log::info!("Snapshot imported, tip {} at height {}", short_hash(&tip), snapshot.size() - 1);
    }
    Ok(snapshot)
}

pub fn build_report(block_index: &BlockIndex, settings: &Settings) -> IndexResult<IndexReport> {
    let tip = block_index.get_tail_id().ok();
    let locator = match &tip {
        Some(tip) => block_index.build_sparse_chain(tip)?,
        None => Vec::new(),
    };
    let block_ids = settings
        .range_start
        .map(|start| block_index.get_block_ids(start, settings.max_ids_per_query));

    Ok(IndexReport {
        blocks: block_index.size(),
        tip_height: tip.and_then(|id| block_index.get_block_height(&id)),
        tip: tip.map(hex::encode),
        locator: locator.iter().map(hex::encode).collect(),
        block_ids: block_ids.map(|ids| ids.iter().map(hex::encode).collect()),
    })
}
