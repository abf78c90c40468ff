//! Narrow interface over the embedded transactional KV store.
//!
//! The logical key namespaces (objects, class index, uuid-to-docID,
//! docID-to-uuid, meta) map to one redb table each. No module outside this
//! one names redb types in public signatures; the object store and allocator
//! work against the table handles opened here.

use std::path::Path;

use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableTable, Table, TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::Distance;

/// `[kind:1][uuid:16]` → object record bytes.
pub(crate) const OBJECTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("objects");
/// `[kind:1][class][0x00][docID:4 BE]` → `[kind:1][uuid:16]`. Big-endian docID
/// keeps class scans in ascending docID order for stable pagination.
pub(crate) const CLASS_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("class_index");
/// `[uuid:16]` → docID.
pub(crate) const UUID_TO_DOC: TableDefinition<&[u8], u32> = TableDefinition::new("uuid_to_doc");
/// docID → `[kind:1][uuid:16]`.
pub(crate) const DOC_TO_UUID: TableDefinition<u32, &[u8]> = TableDefinition::new("doc_to_uuid");
/// Meta keys: shard meta record, docID counter.
pub(crate) const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const SHARD_META_KEY: &str = "shard_meta";
const STORE_FILE: &str = "shard.redb";

/// Persisted shard-level configuration, checked on every open. A shard
/// directory written with one dimension or distance function cannot be
/// reopened with another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ShardMeta {
    pub codec_version: u8,
    pub dim: u16,
    pub distance: Distance,
}

pub(crate) struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| Error::Transient(format!("create shard dir {}: {err}", dir.display())))?;
        let db = Database::create(dir.join(STORE_FILE))?;
        let txn = db.begin_write()?;
        {
            txn.open_table(OBJECTS)?;
            txn.open_table(CLASS_INDEX)?;
            txn.open_table(UUID_TO_DOC)?;
            txn.open_table(DOC_TO_UUID)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn begin_write(&self) -> Result<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    pub fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    pub fn load_meta(&self) -> Result<Option<ShardMeta>> {
        let txn = self.begin_read()?;
        let table = txn.open_table(META)?;
        let Some(raw) = table.get(SHARD_META_KEY)? else {
            return Ok(None);
        };
        let meta = bincode::deserialize(raw.value())
            .map_err(|err| Error::CorruptRecord(format!("decode shard meta: {err}")))?;
        Ok(Some(meta))
    }

    /// Persist the shard meta on first open; verify it on every later one.
    pub fn ensure_meta(&self, expected: &ShardMeta) -> Result<()> {
        if let Some(actual) = self.load_meta()? {
            if actual.codec_version != expected.codec_version {
                return Err(Error::invalid_input(format!(
                    "codec version mismatch: stored={} expected={}",
                    actual.codec_version, expected.codec_version
                )));
            }
            if actual.dim != expected.dim {
                return Err(Error::invalid_input(format!(
                    "vector dimension mismatch: stored={} expected={}",
                    actual.dim, expected.dim
                )));
            }
            if actual.distance != expected.distance {
                return Err(Error::invalid_input(format!(
                    "distance function mismatch: stored={:?} expected={:?}",
                    actual.distance, expected.distance
                )));
            }
            return Ok(());
        }

        let raw = bincode::serialize(expected)
            .map_err(|err| Error::Transient(format!("encode shard meta: {err}")))?;
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(META)?;
            table.insert(SHARD_META_KEY, raw.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// All tables of one write transaction, opened together so an object write,
/// its allocator bindings and its class-index entry commit atomically.
pub(crate) struct Tables<'txn> {
    pub objects: Table<'txn, &'static [u8], &'static [u8]>,
    pub class_index: Table<'txn, &'static [u8], &'static [u8]>,
    pub uuid_to_doc: Table<'txn, &'static [u8], u32>,
    pub doc_to_uuid: Table<'txn, u32, &'static [u8]>,
    pub meta: Table<'txn, &'static str, &'static [u8]>,
}

impl<'txn> Tables<'txn> {
    pub fn open(txn: &'txn WriteTransaction) -> Result<Self> {
        Ok(Self {
            objects: txn.open_table(OBJECTS)?,
            class_index: txn.open_table(CLASS_INDEX)?,
            uuid_to_doc: txn.open_table(UUID_TO_DOC)?,
            doc_to_uuid: txn.open_table(DOC_TO_UUID)?,
            meta: txn.open_table(META)?,
        })
    }
}

pub(crate) struct ReadTables {
    pub objects: ReadOnlyTable<&'static [u8], &'static [u8]>,
    pub class_index: ReadOnlyTable<&'static [u8], &'static [u8]>,
    pub uuid_to_doc: ReadOnlyTable<&'static [u8], u32>,
    pub doc_to_uuid: ReadOnlyTable<u32, &'static [u8]>,
}

impl ReadTables {
    pub fn open(txn: &ReadTransaction) -> Result<Self> {
        Ok(Self {
            objects: txn.open_table(OBJECTS)?,
            class_index: txn.open_table(CLASS_INDEX)?,
            uuid_to_doc: txn.open_table(UUID_TO_DOC)?,
            doc_to_uuid: txn.open_table(DOC_TO_UUID)?,
        })
    }
}

/// Smallest key strictly greater than every key starting with `prefix`, or
/// `None` when no such key exists (prefix of all 0xFF).
pub(crate) fn prefix_exclusive_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != u8::MAX {
            out[idx] += 1;
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}
