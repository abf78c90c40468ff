//! DocID allocator.
//!
//! DocIDs are shard-local, monotonically increasing 32-bit integers and the
//! sole identity the vector index knows. Allocation happens on the tables of
//! the enclosing object-write transaction, so a docID assignment and the
//! object insertion commit atomically. Retired docIDs are never reused; on
//! recovery the counter resumes from the maximum it can prove was handed out.

use redb::ReadableTable;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kv::{KvStore, Tables};
use crate::object::Kind;

pub(crate) const DOC_COUNTER_KEY: &str = "doc_counter";

/// doc_to_uuid value: `[kind:1][uuid:16]`.
pub(crate) fn pack_doc_target(kind: Kind, uuid: Uuid) -> [u8; 17] {
    let mut out = [0u8; 17];
    out[0] = kind.as_byte();
    out[1..17].copy_from_slice(uuid.as_bytes());
    out
}

pub(crate) fn unpack_doc_target(raw: &[u8]) -> Result<(Kind, Uuid)> {
    if raw.len() != 17 {
        return Err(Error::CorruptRecord(format!(
            "doc target has {} bytes, want 17",
            raw.len()
        )));
    }
    let kind = Kind::from_byte(raw[0])
        .ok_or_else(|| Error::CorruptRecord(format!("unknown doc target kind {}", raw[0])))?;
    let uuid = Uuid::from_slice(&raw[1..17])
        .map_err(|_| Error::CorruptRecord("invalid doc target uuid".into()))?;
    Ok((kind, uuid))
}

fn decode_counter(raw: &[u8]) -> Result<u32> {
    bincode::deserialize(raw)
        .map_err(|err| Error::CorruptRecord(format!("decode doc counter: {err}")))
}

fn encode_counter(value: u32) -> Result<Vec<u8>> {
    bincode::serialize(&value)
        .map_err(|err| Error::Transient(format!("encode doc counter: {err}")))
}

/// Allocate the next docID. First allocation on an empty store returns 1.
pub(crate) fn next(tables: &mut Tables) -> Result<u32> {
    let current = match tables.meta.get(DOC_COUNTER_KEY)? {
        Some(guard) => decode_counter(guard.value())?,
        None => 0,
    };
    let next = current
        .checked_add(1)
        .ok_or_else(|| Error::Transient("docID space exhausted".into()))?;
    tables
        .meta
        .insert(DOC_COUNTER_KEY, encode_counter(next)?.as_slice())?;
    Ok(next)
}

pub(crate) fn bind(tables: &mut Tables, uuid: Uuid, kind: Kind, doc_id: u32) -> Result<()> {
    tables
        .uuid_to_doc
        .insert(uuid.as_bytes().as_slice(), doc_id)?;
    tables
        .doc_to_uuid
        .insert(doc_id, pack_doc_target(kind, uuid).as_slice())?;
    Ok(())
}

pub(crate) fn unbind(tables: &mut Tables, uuid: Uuid) -> Result<Option<u32>> {
    let Some(doc_id) = tables
        .uuid_to_doc
        .remove(uuid.as_bytes().as_slice())?
        .map(|guard| guard.value())
    else {
        return Ok(None);
    };
    tables.doc_to_uuid.remove(doc_id)?;
    Ok(Some(doc_id))
}

pub(crate) fn lookup<T>(table: &T, uuid: Uuid) -> Result<Option<u32>>
where
    T: ReadableTable<&'static [u8], u32>,
{
    Ok(table
        .get(uuid.as_bytes().as_slice())?
        .map(|guard| guard.value()))
}

/// Rebuild the counter on open: `max(persisted counter, max observed docID)`.
/// A crash between binding and the next counter persist cannot make the shard
/// hand out an id twice.
pub(crate) fn recover_counter(kv: &KvStore) -> Result<u32> {
    let txn = kv.begin_write()?;
    let reconciled;
    {
        let mut tables = Tables::open(&txn)?;
        let stored = match tables.meta.get(DOC_COUNTER_KEY)? {
            Some(guard) => decode_counter(guard.value())?,
            None => 0,
        };
        let max_observed = tables
            .doc_to_uuid
            .last()?
            .map(|(key, _)| key.value())
            .unwrap_or(0);
        reconciled = stored.max(max_observed);
        if reconciled != stored {
            tables
                .meta
                .insert(DOC_COUNTER_KEY, encode_counter(reconciled)?.as_slice())?;
        }
    }
    txn.commit()?;
    Ok(reconciled)
}
