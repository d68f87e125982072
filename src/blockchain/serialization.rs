//! Saving and restoring a [`BlockIndex`] through named sequence fields.
//!
//! Writers and readers only know how to move an ordered list of block ids
//! under a field name; position in the list is the height.

use std::io::{Read, Write};

use serde_json::{Map, Value};

use crate::blockchain::block_index::BlockIndex;
use crate::blockchain::errors::{IndexError, IndexResult};
use crate::blockchain::BlockHash;
use crate::codec::{read_var_int, read_var_string, write_var_int, write_var_string};
use crate::storage::BlockStorage;
use crate::util::parse_hash;

/// Field the block index is stored under.
pub const INDEX_FIELD: &str = "index";

/// Upper bound on ids accepted from a binary snapshot.
pub const MAX_SERIALIZED_IDS: u64 = 100_000_000;

pub trait IndexWriter {
    fn write_ids(&mut self, field: &str, ids: &[BlockHash]) -> IndexResult<()>;
}

pub trait IndexReader {
    fn read_ids(&mut self, field: &str) -> IndexResult<Vec<BlockHash>>;
}

impl BlockIndex {
    pub fn serialize<W: IndexWriter + ?Sized>(&self, writer: &mut W) -> IndexResult<()> {
        let ids: Vec<BlockHash> = self.iter().copied().collect();
        writer.write_ids(INDEX_FIELD, &ids)?;
        log::info!("Saved block index with {} blocks", ids.len());
        Ok(())
    }

    /// Rebuilds an index from `reader`, heights taken from position.
    ///
    /// A repeated id fails the whole load rather than producing a broken reverse map.
    pub fn deserialize<R: IndexReader + ?Sized>(reader: &mut R) -> IndexResult<Self> {
        let ids = reader.read_ids(INDEX_FIELD)?;
        if ids.len() > u32::MAX as usize {
            return Err(IndexError::Format(format!("{} ids exceed the height range", ids.len())));
        }
        let mut block_index = BlockIndex::new();
        for id in ids {
            block_index.push(id)?;
        }
        log::info!("Restored block index with {} blocks", block_index.len());
        Ok(block_index)
    }
}

/// Binary layout: var-string field name, var-int count, then raw 32-byte ids.
pub struct BinaryWriter<W: Write> {
    inner: W,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(inner: W) -> Self {
        BinaryWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> IndexWriter for BinaryWriter<W> {
    fn write_ids(&mut self, field: &str, ids: &[BlockHash]) -> IndexResult<()> {
        write_var_string(&mut self.inner, field)?;
        write_var_int(&mut self.inner, ids.len() as u64)?;
        for id in ids {
            self.inner.write_all(id)?;
        }
        self.inner.flush()?;
        Ok(())
    }
}

pub struct BinaryReader<R: Read> {
    inner: R,
}

impl<R: Read> BinaryReader<R> {
    pub fn new(inner: R) -> Self {
        BinaryReader { inner }
    }
}

impl<R: Read> IndexReader for BinaryReader<R> {
    fn read_ids(&mut self, field: &str) -> IndexResult<Vec<BlockHash>> {
        let name = read_var_string(&mut self.inner)?;
        if name != field {
            return Err(IndexError::Format(format!("expected field {:?}, found {:?}", field, name)));
        }
        let count = read_var_int(&mut self.inner)?;
        if count > MAX_SERIALIZED_IDS {
            return Err(IndexError::Format(format!("id count {} > max {}", count, MAX_SERIALIZED_IDS)));
        }
        // Grow with the data actually read, not the claimed count.
        let mut ids = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let mut id = [0u8; 32];
            self.inner.read_exact(&mut id)?;
            ids.push(id);
        }
        Ok(ids)
    }
}

/// JSON object mapping each field to an array of hex ids.
pub struct JsonWriter<W: Write> {
    inner: W,
}

impl<W: Write> JsonWriter<W> {
    pub fn new(inner: W) -> Self {
        JsonWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> IndexWriter for JsonWriter<W> {
    fn write_ids(&mut self, field: &str, ids: &[BlockHash]) -> IndexResult<()> {
        let hex_ids: Vec<Value> = ids.iter().map(|id| Value::String(hex::encode(id))).collect();
        let mut object = Map::new();
        object.insert(field.to_string(), Value::Array(hex_ids));
        serde_json::to_writer(&mut self.inner, &Value::Object(object))?;
        self.inner.flush()?;
        Ok(())
    }
}

pub struct JsonReader {
    object: Map<String, Value>,
}

impl JsonReader {
    pub fn from_reader<R: Read>(reader: R) -> IndexResult<Self> {
        match serde_json::from_reader(reader)? {
            Value::Object(object) => Ok(JsonReader { object }),
            other => Err(IndexError::Format(format!("expected a JSON object, found {}", other))),
        }
    }
}

impl IndexReader for JsonReader {
    fn read_ids(&mut self, field: &str) -> IndexResult<Vec<BlockHash>> {
        let values = match self.object.get(field) {
            Some(Value::Array(values)) => values,
            Some(_) => return Err(IndexError::Format(format!("field {:?} is not an array", field))),
            None => return Err(IndexError::Format(format!("missing field {:?}", field))),
        };
        values
            .iter()
            .map(|value| match value {
                Value::String(s) => parse_hash(s),
                other => Err(IndexError::Format(format!("non-string block id {}", other))),
            })
            .collect()
    }
}

/// Binary snapshot kept in the block database's metadata table, one blob per field.
pub struct StorageSnapshot<'a> {
    storage: &'a dyn BlockStorage,
}

impl<'a> StorageSnapshot<'a> {
    pub fn new(storage: &'a dyn BlockStorage) -> Self {
        StorageSnapshot { storage }
    }
}

impl IndexWriter for StorageSnapshot<'_> {
    fn write_ids(&mut self, field: &str, ids: &[BlockHash]) -> IndexResult<()> {
        let mut writer = BinaryWriter::new(Vec::with_capacity(ids.len() * 32 + 16));
        writer.write_ids(field, ids)?;
        self.storage.save_metadata_blob(field, &writer.into_inner())?;
        Ok(())
    }
}

impl IndexReader for StorageSnapshot<'_> {
    fn read_ids(&mut self, field: &str) -> IndexResult<Vec<BlockHash>> {
        let blob = self
            .storage
            .load_metadata_blob(field)?
            .ok_or_else(|| IndexError::Format(format!("no snapshot stored under {:?}", field)))?;
        BinaryReader::new(blob.as_slice()).read_ids(field)
    }
}
