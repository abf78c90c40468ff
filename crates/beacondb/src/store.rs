//! Object store: typed CRUD over the KV tables.
//!
//! Records live under `[kind][uuid]`; a class index under
//! `[kind][class][0x00][docID BE]` supports class-scoped enumeration in
//! ascending docID order. All mutating operations work on the tables of an
//! open write transaction so the caller decides the commit boundary; the
//! batch coordinator runs a whole chunk through one transaction this way.

use std::path::Path;

use redb::ReadableTable;
use tracing::error;
use uuid::Uuid;

use crate::codec;
use crate::docid;
use crate::error::{Error, Result};
use crate::kv::{prefix_exclusive_end, KvStore, ReadTables, ShardMeta, Tables};
use crate::object::{Kind, MergeDocument, Object, PropertyValue, Reference};
use crate::schema::ClassDef;

pub(crate) struct PutOutcome {
    pub doc_id: u32,
    pub created: bool,
}

pub(crate) struct MergeOutcome {
    pub doc_id: u32,
    pub vector: Vec<f32>,
    pub vector_changed: bool,
}

/// `[kind:1][uuid:16]`; same packing as the allocator's doc target.
fn object_key(kind: Kind, uuid: Uuid) -> [u8; 17] {
    docid::pack_doc_target(kind, uuid)
}

/// `[kind:1][class][0x00][docID:4 BE]`. Class names are schema-validated
/// UTF-8 identifiers and never contain NUL, so 0x00 is a safe separator; the
/// big-endian docID keeps the scan ordered for pagination.
fn class_index_key(kind: Kind, class: &str, doc_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + class.len() + 1 + 4);
    key.push(kind.as_byte());
    key.extend_from_slice(class.as_bytes());
    key.push(0);
    key.extend_from_slice(&doc_id.to_be_bytes());
    key
}

fn class_index_prefix(kind: Kind, class: Option<&str>) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + class.map_or(0, |c| c.len() + 1));
    prefix.push(kind.as_byte());
    if let Some(class) = class {
        prefix.extend_from_slice(class.as_bytes());
        prefix.push(0);
    }
    prefix
}

fn doc_id_from_class_key(key: &[u8]) -> Result<u32> {
    let Some(tail) = key.len().checked_sub(4).and_then(|at| key.get(at..)) else {
        return Err(Error::CorruptRecord("short class index key".into()));
    };
    let mut arr = [0u8; 4];
    arr.copy_from_slice(tail);
    Ok(u32::from_be_bytes(arr))
}

fn decode_record(raw: &[u8], uuid: Uuid) -> Result<Object> {
    codec::decode(raw).map_err(|err| {
        error!(%uuid, %err, "object record failed to decode");
        err
    })
}

pub(crate) struct ObjectStore {
    kv: KvStore,
}

impl ObjectStore {
    pub fn open(dir: &Path, meta: ShardMeta) -> Result<Self> {
        let kv = KvStore::open(dir)?;
        kv.ensure_meta(&meta)?;
        docid::recover_counter(&kv)?;
        Ok(Self { kv })
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Idempotent create: an absent UUID allocates a docID and inserts; a
    /// present one takes the update path.
    pub fn put_in_tx(
        &self,
        tables: &mut Tables,
        obj: &mut Object,
        now: i64,
    ) -> Result<PutOutcome> {
        let key = object_key(obj.kind, obj.uuid);
        let existing = tables
            .objects
            .get(key.as_slice())?
            .map(|guard| guard.value().to_vec());
        match existing {
            Some(raw) => {
                let doc_id = self.replace_in_tx(tables, obj, &raw, now)?;
                Ok(PutOutcome {
                    doc_id,
                    created: false,
                })
            }
            None => {
                obj.created_at = now;
                obj.updated_at = now;
                let doc_id = docid::next(tables)?;
                docid::bind(tables, obj.uuid, obj.kind, doc_id)?;
                tables.class_index.insert(
                    class_index_key(obj.kind, &obj.class, doc_id).as_slice(),
                    obj.uuid.as_bytes().as_slice(),
                )?;
                obj.doc_id = Some(doc_id);
                let record = codec::encode(obj)?;
                tables.objects.insert(key.as_slice(), record.as_slice())?;
                Ok(PutOutcome {
                    doc_id,
                    created: true,
                })
            }
        }
    }

    /// Full replace. Fails with `NotFound` when the UUID is absent.
    pub fn update_in_tx(&self, tables: &mut Tables, obj: &mut Object, now: i64) -> Result<u32> {
        let key = object_key(obj.kind, obj.uuid);
        let Some(raw) = tables
            .objects
            .get(key.as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(obj.uuid));
        };
        self.replace_in_tx(tables, obj, &raw, now)
    }

    /// Replace the stored record, preserving docID and createdAt.
    fn replace_in_tx(
        &self,
        tables: &mut Tables,
        obj: &mut Object,
        stored_raw: &[u8],
        now: i64,
    ) -> Result<u32> {
        let stored = decode_record(stored_raw, obj.uuid)?;
        let doc_id = docid::lookup(&tables.uuid_to_doc, obj.uuid)?.ok_or_else(|| {
            Error::CorruptRecord(format!("object {} has no docID mapping", obj.uuid))
        })?;
        obj.created_at = stored.created_at;
        obj.updated_at = stored.updated_at;
        obj.touch_updated(now);
        obj.doc_id = Some(doc_id);
        if stored.class != obj.class {
            tables
                .class_index
                .remove(class_index_key(obj.kind, &stored.class, doc_id).as_slice())?;
            tables.class_index.insert(
                class_index_key(obj.kind, &obj.class, doc_id).as_slice(),
                obj.uuid.as_bytes().as_slice(),
            )?;
        }
        let record = codec::encode(obj)?;
        tables
            .objects
            .insert(object_key(obj.kind, obj.uuid).as_slice(), record.as_slice())?;
        Ok(doc_id)
    }

    /// Property-wise merge. Multi-references append to the stored list; every
    /// other property overwrites as a whole value. The stored vector changes
    /// only when the patch carries one that differs.
    pub fn merge_in_tx(
        &self,
        tables: &mut Tables,
        doc: &MergeDocument,
        class_def: Option<&ClassDef>,
        now: i64,
    ) -> Result<MergeOutcome> {
        let key = object_key(doc.kind, doc.uuid);
        let Some(raw) = tables
            .objects
            .get(key.as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(doc.uuid));
        };
        let mut stored = decode_record(&raw, doc.uuid)?;
        let doc_id = docid::lookup(&tables.uuid_to_doc, doc.uuid)?.ok_or_else(|| {
            Error::CorruptRecord(format!("object {} has no docID mapping", doc.uuid))
        })?;

        for (name, patch) in &doc.properties {
            match (stored.properties.get_mut(name), patch) {
                (
                    Some(PropertyValue::MultiRef(existing)),
                    PropertyValue::MultiRef(additions),
                ) => {
                    let allow_duplicates = class_def
                        .and_then(|def| def.properties.get(name))
                        .map(|prop| prop.allow_duplicate_refs)
                        .unwrap_or(false);
                    for addition in additions {
                        if allow_duplicates
                            || !existing.iter().any(|r| r.beacon == addition.beacon)
                        {
                            existing.push(addition.clone());
                        }
                    }
                }
                _ => {
                    stored.properties.insert(name.clone(), patch.clone());
                }
            }
        }

        let vector_changed = match &doc.vector {
            Some(vector) if *vector != stored.vector => {
                stored.vector = vector.clone();
                true
            }
            _ => false,
        };

        stored.touch_updated(now);
        let record = codec::encode(&stored)?;
        tables.objects.insert(key.as_slice(), record.as_slice())?;
        Ok(MergeOutcome {
            doc_id,
            vector: stored.vector,
            vector_changed,
        })
    }

    /// Remove record, class-index entry and both allocator mappings. Returns
    /// the retired docID for the caller's vector-index delete.
    pub fn delete_in_tx(&self, tables: &mut Tables, kind: Kind, uuid: Uuid) -> Result<u32> {
        let key = object_key(kind, uuid);
        let Some(raw) = tables
            .objects
            .remove(key.as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(uuid));
        };
        let stored = decode_record(&raw, uuid)?;
        let doc_id = docid::unbind(tables, uuid)?.ok_or_else(|| {
            Error::CorruptRecord(format!("object {uuid} has no docID mapping"))
        })?;
        tables
            .class_index
            .remove(class_index_key(kind, &stored.class, doc_id).as_slice())?;
        Ok(doc_id)
    }

    /// Reference add reduces to a one-property merge document, the way the
    /// batch reference path does.
    pub fn add_reference_in_tx(
        &self,
        tables: &mut Tables,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        reference: Reference,
        class_def: Option<&ClassDef>,
        now: i64,
    ) -> Result<()> {
        let mut properties = std::collections::BTreeMap::new();
        properties.insert(property.to_string(), PropertyValue::MultiRef(vec![reference]));
        let doc = MergeDocument {
            kind,
            class: String::new(),
            uuid,
            properties,
            vector: None,
        };
        self.merge_in_tx(tables, &doc, class_def, now)?;
        Ok(())
    }

    /// Replace the entire multi-reference list of one property atomically.
    pub fn update_references_in_tx(
        &self,
        tables: &mut Tables,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        references: Vec<Reference>,
        now: i64,
    ) -> Result<()> {
        let key = object_key(kind, uuid);
        let Some(raw) = tables
            .objects
            .get(key.as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(uuid));
        };
        let mut stored = decode_record(&raw, uuid)?;
        stored
            .properties
            .insert(property.to_string(), PropertyValue::MultiRef(references));
        stored.touch_updated(now);
        let record = codec::encode(&stored)?;
        tables.objects.insert(key.as_slice(), record.as_slice())?;
        Ok(())
    }

    /// Remove every occurrence of the beacon from the property's list.
    /// Removing a beacon that is not present is a no-op.
    pub fn delete_reference_in_tx(
        &self,
        tables: &mut Tables,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        reference: &Reference,
        now: i64,
    ) -> Result<()> {
        let key = object_key(kind, uuid);
        let Some(raw) = tables
            .objects
            .get(key.as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(uuid));
        };
        let mut stored = decode_record(&raw, uuid)?;
        if let Some(PropertyValue::MultiRef(list)) = stored.properties.get_mut(property) {
            list.retain(|r| r.beacon != reference.beacon);
        }
        stored.touch_updated(now);
        let record = codec::encode(&stored)?;
        tables.objects.insert(key.as_slice(), record.as_slice())?;
        Ok(())
    }

    /// Read and decode one object; `doc_id` is resolved from the allocator
    /// mapping.
    pub fn get(&self, kind: Kind, uuid: Uuid) -> Result<Object> {
        let txn = self.kv.begin_read()?;
        let tables = ReadTables::open(&txn)?;
        let Some(raw) = tables
            .objects
            .get(object_key(kind, uuid).as_slice())?
            .map(|guard| guard.value().to_vec())
        else {
            return Err(Error::not_found(uuid));
        };
        let mut obj = decode_record(&raw, uuid)?;
        obj.doc_id = docid::lookup(&tables.uuid_to_doc, uuid)?;
        Ok(obj)
    }

    /// Reverse-resolve a docID to its kind and UUID, if still live.
    pub fn resolve_doc(&self, doc_id: u32) -> Result<Option<(Kind, Uuid)>> {
        let txn = self.kv.begin_read()?;
        let tables = ReadTables::open(&txn)?;
        let Some(raw) = tables
            .doc_to_uuid
            .get(doc_id)?
            .map(|guard| guard.value().to_vec())
        else {
            return Ok(None);
        };
        docid::unpack_doc_target(&raw).map(Some)
    }

    /// Enumerate by kind and optional class, capped at `limit`, in ascending
    /// docID order.
    pub fn list(&self, kind: Kind, class: Option<&str>, limit: usize) -> Result<Vec<Object>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let txn = self.kv.begin_read()?;
        let tables = ReadTables::open(&txn)?;

        let prefix = class_index_prefix(kind, class);
        let mut entries: Vec<(u32, Uuid)> = Vec::new();
        let iter = match prefix_exclusive_end(&prefix) {
            Some(end) => tables
                .class_index
                .range::<&[u8]>(prefix.as_slice()..end.as_slice())?,
            None => tables.class_index.range::<&[u8]>(prefix.as_slice()..)?,
        };
        for item in iter {
            let (key, value) = item?;
            let doc_id = doc_id_from_class_key(key.value())?;
            let uuid = Uuid::from_slice(value.value())
                .map_err(|_| Error::CorruptRecord("invalid uuid in class index".into()))?;
            entries.push((doc_id, uuid));
            // class-scoped scans arrive docID-ordered; cap early
            if class.is_some() && entries.len() >= limit {
                break;
            }
        }
        if class.is_none() {
            // the kind-wide scan is (class, docID)-ordered; re-sort for
            // docID-stable pagination
            entries.sort_by_key(|(doc_id, _)| *doc_id);
            entries.truncate(limit);
        }

        let mut out = Vec::with_capacity(entries.len());
        for (doc_id, uuid) in entries {
            let Some(raw) = tables
                .objects
                .get(object_key(kind, uuid).as_slice())?
                .map(|guard| guard.value().to_vec())
            else {
                return Err(Error::CorruptRecord(format!(
                    "class index points at missing object {uuid}"
                )));
            };
            let mut obj = decode_record(&raw, uuid)?;
            obj.doc_id = Some(doc_id);
            out.push(obj);
        }
        Ok(out)
    }
}
