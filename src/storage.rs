use crate::blockchain::chain_source::{ChainSource, RANGE_PREALLOC_LIMIT};
use crate::blockchain::errors::IndexError;
use crate::blockchain::BlockHash;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Durable height <-> block id store. The index reads from it; only the
/// chain-state owner writes to it.
pub trait BlockStorage: Send + Sync + std::fmt::Debug {
    fn save_block_id(&self, height: u32, hash: &BlockHash) -> Result<(), RusqliteError>;
    fn get_block_height(&self, hash: &BlockHash) -> Result<Option<u32>, RusqliteError>;
    fn get_block_hash_by_height(&self, height: u32) -> Result<Option<BlockHash>, RusqliteError>;
    /// Highest stored height + 1, or 0 when empty.
    fn get_block_count(&self) -> Result<u32, RusqliteError>;
    /// Contiguous run of ids from `start_height`, at most `count` long.
    fn get_block_hashes_by_height_range(&self, start_height: u32, count: u32) -> Result<Vec<BlockHash>, RusqliteError>;
    /// Deletes every id at height `>= height`, returning how many went.
    fn remove_block_ids_from(&self, height: u32) -> Result<usize, RusqliteError>;
    /// Swaps the whole stored chain for `ids` (position = height) in one transaction.
    /// On error the previous chain is left as it was.
    fn replace_block_ids(&self, ids: &[BlockHash]) -> Result<(), RusqliteError>;
    fn save_metadata_blob(&self, key: &str, value: &[u8]) -> Result<(), RusqliteError>;
    fn load_metadata_blob(&self, key: &str) -> Result<Option<Vec<u8>>, RusqliteError>;
    fn reset(&self) -> Result<(), RusqliteError>;
}

pub struct SqliteBlockStorage {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBlockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBlockStorage")
         .field("conn", &"Mutex<Connection>")
         .finish()
    }
}

fn hash_from_blob(column: usize, blob: Vec<u8>) -> Result<BlockHash, RusqliteError> {
    blob.try_into().map_err(|v: Vec<u8>| {
        RusqliteError::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid hash length {} in block_ids", v.len()),
            )),
        )
    })
}

impl SqliteBlockStorage {
    pub fn new(db_path: &str) -> Result<Self, RusqliteError> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, RusqliteError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RusqliteError> {
        conn.execute("CREATE TABLE IF NOT EXISTS block_ids (height INTEGER PRIMARY KEY, hash BLOB NOT NULL UNIQUE)", [])?;
        conn.execute("CREATE TABLE IF NOT EXISTS chain_metadata (key TEXT PRIMARY KEY, value_blob BLOB)", [])?;
        Ok(SqliteBlockStorage { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic elsewhere cannot leave the connection itself half-updated.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlockStorage for SqliteBlockStorage {
    fn save_block_id(&self, height: u32, hash: &BlockHash) -> Result<(), RusqliteError> {
        let conn = self.conn();
        // Replacing by height is fine; reusing a hash at a second height hits the UNIQUE constraint.
        conn.execute(
            "INSERT INTO block_ids (height, hash) VALUES (?1, ?2) ON CONFLICT(height) DO UPDATE SET hash = excluded.hash",
            params![height, hash.to_vec()],
        )?;
        Ok(())
    }

    fn get_block_height(&self, hash: &BlockHash) -> Result<Option<u32>, RusqliteError> {
        let conn = self.conn();
        conn.query_row("SELECT height FROM block_ids WHERE hash = ?1", params![hash.to_vec()], |row| row.get(0))
            .optional()
    }

    fn get_block_hash_by_height(&self, height: u32) -> Result<Option<BlockHash>, RusqliteError> {
        let conn = self.conn();
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT hash FROM block_ids WHERE height = ?1", params![height], |row| row.get(0))
            .optional()?;
        blob.map(|b| hash_from_blob(0, b)).transpose()
    }

    fn get_block_count(&self) -> Result<u32, RusqliteError> {
        let conn = self.conn();
        conn.query_row("SELECT COALESCE(MAX(height) + 1, 0) FROM block_ids", [], |row| row.get(0))
    }

    fn get_block_hashes_by_height_range(&self, start_height: u32, count: u32) -> Result<Vec<BlockHash>, RusqliteError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT height, hash FROM block_ids WHERE height >= ?1 ORDER BY height ASC LIMIT ?2")?;
        let rows = stmt.query_map(params![start_height, count], |row| {
            let height: u32 = row.get(0)?;
            let hash_vec: Vec<u8> = row.get(1)?;
            Ok((height, hash_from_blob(1, hash_vec)?))
        })?;
        let mut hashes = Vec::with_capacity(count.min(RANGE_PREALLOC_LIMIT) as usize);
        for (expected, row_result) in (start_height..).zip(rows) {
            let (height, hash) = row_result?;
            if height != expected {
                log::warn!("Gap in block_ids: expected height {}, found {}", expected, height);
                break;
            }
            hashes.push(hash);
        }
        Ok(hashes)
    }

    fn remove_block_ids_from(&self, height: u32) -> Result<usize, RusqliteError> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM block_ids WHERE height >= ?1", params![height])?;
        log::debug!("Removed {} block ids from height {}", removed, height);
        Ok(removed)
    }

    fn replace_block_ids(&self, ids: &[BlockHash]) -> Result<(), RusqliteError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM block_ids", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO block_ids (height, hash) VALUES (?1, ?2)")?;
            for (height, id) in (0u32..).zip(ids) {
                stmt.execute(params![height, id.to_vec()])?;
            }
        }
        tx.commit()?;
        log::debug!("Replaced stored chain with {} block ids", ids.len());
        Ok(())
    }

    fn save_metadata_blob(&self, key: &str, value: &[u8]) -> Result<(), RusqliteError> {
        let conn = self.conn();
        conn.execute("INSERT OR REPLACE INTO chain_metadata (key, value_blob) VALUES (?1, ?2)", params![key, value])?;
        Ok(())
    }

    fn load_metadata_blob(&self, key: &str) -> Result<Option<Vec<u8>>, RusqliteError> {
        let conn = self.conn();
        let value: Option<Option<Vec<u8>>> = conn
            .query_row("SELECT value_blob FROM chain_metadata WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    fn reset(&self) -> Result<(), RusqliteError> {
        let conn = self.conn();
        conn.execute_batch("DELETE FROM block_ids; DELETE FROM chain_metadata;")?;
        log::info!("Block storage reset");
        Ok(())
    }
}

impl<T: BlockStorage + ?Sized> ChainSource for T {
    type Error = IndexError;

    fn chain_len(&self) -> Result<u32, IndexError> {
        Ok(self.get_block_count()?)
    }

    fn height_of(&self, id: &BlockHash) -> Result<Option<u32>, IndexError> {
        Ok(self.get_block_height(id)?)
    }

    fn id_at(&self, height: u32) -> Result<Option<BlockHash>, IndexError> {
        Ok(self.get_block_hash_by_height(height)?)
    }

    fn ids_in_range(&self, start: u32, count: u32) -> Result<Vec<BlockHash>, IndexError> {
        Ok(self.get_block_hashes_by_height_range(start, count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block_index::tests::{chain_of, test_id};
    use crate::blockchain::{chain_source, locator, BlockIndex};

    fn storage_with_chain(len: u32) -> SqliteBlockStorage {
        let storage = SqliteBlockStorage::in_memory().unwrap();
        for n in 0..len {
            storage.save_block_id(n, &test_id(n)).unwrap();
        }
        storage
    }

    /// Storage whose every call fails, standing in for a broken database.
    #[derive(Debug)]
    struct FailingStorage;

    impl BlockStorage for FailingStorage {
        fn save_block_id(&self, _: u32, _: &BlockHash) -> Result<(), RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn get_block_height(&self, _: &BlockHash) -> Result<Option<u32>, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn get_block_hash_by_height(&self, _: u32) -> Result<Option<BlockHash>, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn get_block_count(&self) -> Result<u32, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn get_block_hashes_by_height_range(&self, _: u32, _: u32) -> Result<Vec<BlockHash>, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn remove_block_ids_from(&self, _: u32) -> Result<usize, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn replace_block_ids(&self, _: &[BlockHash]) -> Result<(), RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn save_metadata_blob(&self, _: &str, _: &[u8]) -> Result<(), RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn load_metadata_blob(&self, _: &str) -> Result<Option<Vec<u8>>, RusqliteError> { Err(RusqliteError::InvalidQuery) }
        fn reset(&self) -> Result<(), RusqliteError> { Err(RusqliteError::InvalidQuery) }
    }

    #[test]
    fn height_and_hash_lookups() {
        let storage = storage_with_chain(5);
        assert_eq!(storage.get_block_count().unwrap(), 5);
        assert_eq!(storage.get_block_height(&test_id(3)).unwrap(), Some(3));
        assert_eq!(storage.get_block_height(&[0xee; 32]).unwrap(), None);
        assert_eq!(storage.get_block_hash_by_height(4).unwrap(), Some(test_id(4)));
        assert_eq!(storage.get_block_hash_by_height(5).unwrap(), None);
    }

    #[test]
    fn same_hash_at_second_height_is_a_backend_error() {
        let storage = storage_with_chain(3);
        assert!(storage.save_block_id(3, &test_id(0)).is_err());
        assert_eq!(storage.get_block_height(&test_id(0)).unwrap(), Some(0));
    }

    #[test]
    fn range_query_matches_in_memory_index() {
        let storage = storage_with_chain(20);
        let memory = chain_of(20);
        for (start, max) in [(0, 5), (15, 100), (19, 1), (20, 3), (500, 1)] {
            assert_eq!(chain_source::block_ids(&storage, start, max).unwrap(), memory.get_block_ids(start, max));
        }
    }

    #[test]
    fn range_query_stops_at_gap() {
        let storage = storage_with_chain(10);
        let conn = storage.conn();
        conn.execute("DELETE FROM block_ids WHERE height = 5", []).unwrap();
        drop(conn);
        assert_eq!(storage.get_block_hashes_by_height_range(3, 5).unwrap(), vec![test_id(3), test_id(4)]);
        assert!(matches!(BlockIndex::from_source(&storage), Err(IndexError::MissingHeight(5))));
    }

    #[test]
    fn far_height_row_reports_missing_height() {
        let storage = SqliteBlockStorage::in_memory().unwrap();
        storage.save_block_id(0, &test_id(0)).unwrap();
        storage.save_block_id(4_000_000_000, &test_id(1)).unwrap();
        assert_eq!(storage.get_block_count().unwrap(), 4_000_000_001);

        assert!(matches!(BlockIndex::from_source(&storage), Err(IndexError::MissingHeight(1))));
        assert_eq!(chain_source::block_ids(&storage, 0, u32::MAX).unwrap(), vec![test_id(0)]);
    }

    #[test]
    fn replace_block_ids_swaps_whole_chain() {
        let storage = storage_with_chain(10);
        let ids: Vec<BlockHash> = (100..104).map(test_id).collect();
        storage.replace_block_ids(&ids).unwrap();
        assert_eq!(storage.get_block_count().unwrap(), 4);
        assert_eq!(storage.get_block_height(&test_id(0)).unwrap(), None);
        assert_eq!(BlockIndex::from_source(&storage).unwrap().get_block_ids(0, 10), ids);
    }

    #[test]
    fn failed_replace_rolls_back() {
        let storage = storage_with_chain(5);
        // The repeated id trips the UNIQUE constraint after the delete and two inserts.
        let ids = [test_id(50), test_id(51), test_id(50)];
        assert!(storage.replace_block_ids(&ids).is_err());
        assert_eq!(BlockIndex::from_source(&storage).unwrap(), chain_of(5));
    }

    #[test]
    fn find_supplement_scans_full_candidate_list() {
        let storage = storage_with_chain(10);
        let candidates = [[0xee; 32], [0xef; 32], test_id(6), test_id(2)];
        assert_eq!(locator::find_supplement(&storage, &candidates).unwrap(), Some(6));
        assert_eq!(locator::find_supplement(&storage, &[[0xee; 32]]).unwrap(), None);
    }

    #[test]
    fn sparse_chain_from_database_matches_memory() {
        let storage = storage_with_chain(100);
        let memory = chain_of(100);
        for start in [0u32, 1, 37, 99] {
            assert_eq!(
                locator::build_sparse_chain(&storage, &test_id(start)).unwrap(),
                memory.build_sparse_chain(&test_id(start)).unwrap()
            );
        }
        assert!(matches!(locator::build_sparse_chain(&storage, &[0xee; 32]), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn backend_failures_are_not_reported_as_not_found() {
        let storage = FailingStorage;
        assert!(matches!(locator::find_supplement(&storage, &[test_id(0)]), Err(IndexError::Backend(_))));
        assert!(matches!(locator::build_sparse_chain(&storage, &test_id(0)), Err(IndexError::Backend(_))));
        assert!(matches!(chain_source::block_ids(&storage, 0, 10), Err(IndexError::Backend(_))));
        assert!(matches!(BlockIndex::from_source(&storage), Err(IndexError::Backend(_))));
    }

    #[test]
    fn remove_from_height_truncates_tail() {
        let storage = storage_with_chain(10);
        assert_eq!(storage.remove_block_ids_from(6).unwrap(), 4);
        assert_eq!(storage.get_block_count().unwrap(), 6);
        storage.save_block_id(6, &test_id(9)).unwrap();
        assert_eq!(storage.get_block_height(&test_id(9)).unwrap(), Some(6));
    }

    #[test]
    fn metadata_blobs_and_reset() {
        let storage = storage_with_chain(3);
        assert_eq!(storage.load_metadata_blob("index").unwrap(), None);
        storage.save_metadata_blob("index", &[1, 2, 3]).unwrap();
        assert_eq!(storage.load_metadata_blob("index").unwrap(), Some(vec![1, 2, 3]));
        storage.reset().unwrap();
        assert_eq!(storage.get_block_count().unwrap(), 0);
        assert_eq!(storage.load_metadata_blob("index").unwrap(), None);
    }

    #[test]
    fn hydrated_index_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("block_index.sqlite");
        let db_path = db_path.to_str().unwrap();
        {
            let storage = SqliteBlockStorage::new(db_path).unwrap();
            for n in 0..40 {
                storage.save_block_id(n, &test_id(n)).unwrap();
            }
        }
        let storage = SqliteBlockStorage::new(db_path).unwrap();
        let block_index = BlockIndex::from_source(&storage).unwrap();
        assert_eq!(block_index, chain_of(40));
    }
}
