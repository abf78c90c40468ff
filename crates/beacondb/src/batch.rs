//! Batch coordinator.
//!
//! A batch splits into contiguous chunks of at most `max_per_transaction`
//! items; each chunk runs through a single KV write transaction on a rayon
//! worker, so parallelism is bounded by the pool rather than one task per
//! chunk. A failing item aborts its whole chunk and records the same error
//! for every index the chunk covered. After the transactional phase, a second
//! parallel phase issues `add(docID, vector)` for every index with no
//! recorded error; reference batches skip that phase because references never
//! move vectors.
//!
//! Per-item states: queued → inTxn → committed → indexed, with `failed`
//! terminal from the transaction (chunk abort) or the index phase.
//! Cancellation observed before a commit aborts the transaction without side
//! effects; chunks that already committed stay committed and keep their error
//! slots empty, their index entries caught up by re-ingestion or an offline
//! reconciler.

use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::error::Error;
use crate::object::{now_unix_nanos, BatchReference, Object};
use crate::shard::{OpContext, Shard};

/// Outcome map of a batch: original index → terminal error. Absence means
/// success.
pub type BatchErrors = FxHashMap<usize, Error>;

pub(crate) fn put_object_batch(
    shard: &Shard,
    ctx: &OpContext,
    objects: Vec<Object>,
) -> BatchErrors {
    if objects.is_empty() {
        return BatchErrors::default();
    }
    let chunk_size = shard.cfg.max_per_transaction;
    let errs: Mutex<BatchErrors> = Mutex::new(BatchErrors::default());
    // original index → (docID, vector) published after the chunk commits
    let doc_ids: Mutex<FxHashMap<usize, (u32, Vec<f32>)>> = Mutex::new(FxHashMap::default());

    let chunks: Vec<(usize, &[Object])> = objects
        .chunks(chunk_size)
        .enumerate()
        .map(|(n, chunk)| (n * chunk_size, chunk))
        .collect();

    chunks.par_iter().for_each(|(start, chunk)| {
        shard.stats.batch_chunks.fetch_add(1, Ordering::Relaxed);
        let result = shard.commit_write(ctx, |tables| {
            let mut assigned = Vec::with_capacity(chunk.len());
            for (offset, original) in chunk.iter().enumerate() {
                let mut obj = original.clone();
                if obj.uuid.is_nil() {
                    obj.uuid = Uuid::new_v4();
                }
                shard.validate_against_schema(&obj)?;
                if obj.vector.is_empty() {
                    obj.vector = shard.vectorizer.vectorize(&obj.class, &obj.properties)?;
                }
                shard.validate_vector(&obj.vector)?;
                let outcome = shard.store.put_in_tx(tables, &mut obj, now_unix_nanos())?;
                assigned.push((start + offset, outcome.doc_id, obj.vector));
            }
            Ok(assigned)
        });
        match result {
            Ok(assigned) => {
                let mut ids = doc_ids.lock();
                for (index, doc_id, vector) in assigned {
                    ids.insert(index, (doc_id, vector));
                }
            }
            Err(err) => {
                // transactional all-or-nothing per chunk
                let mut errs = errs.lock();
                for index in *start..start + chunk.len() {
                    errs.insert(index, err.clone());
                }
            }
        }
    });

    (0..objects.len()).into_par_iter().for_each(|index| {
        if errs.lock().contains_key(&index) {
            return;
        }
        let Some((doc_id, vector)) = doc_ids.lock().get(&index).cloned() else {
            return;
        };
        if ctx.check().is_err() {
            // committed but not indexed; the object store stays the source
            // of truth and the entry is re-issued by a reconciler
            return;
        }
        match shard.index_add(doc_id, &vector) {
            Ok(()) => {
                shard.stats.batch_objects.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                errs.lock().insert(index, err);
            }
        }
    });

    errs.into_inner()
}

pub(crate) fn add_references_batch(
    shard: &Shard,
    ctx: &OpContext,
    references: Vec<BatchReference>,
) -> BatchErrors {
    if references.is_empty() {
        return BatchErrors::default();
    }
    let chunk_size = shard.cfg.max_per_transaction;
    let errs: Mutex<BatchErrors> = Mutex::new(BatchErrors::default());

    let chunks: Vec<(usize, &[BatchReference])> = references
        .chunks(chunk_size)
        .enumerate()
        .map(|(n, chunk)| (n * chunk_size, chunk))
        .collect();

    chunks.par_iter().for_each(|(start, chunk)| {
        shard.stats.batch_chunks.fetch_add(1, Ordering::Relaxed);
        let result = shard.commit_write(ctx, |tables| {
            for reference in chunk.iter() {
                let def = shard.class_def(reference.from_kind, &reference.from_class)?;
                let doc = reference.to_merge_document();
                for (name, value) in &doc.properties {
                    crate::shard::validate_property(&def, name, value)?;
                }
                shard
                    .store
                    .merge_in_tx(tables, &doc, Some(&def), now_unix_nanos())?;
            }
            Ok(())
        });
        if let Err(err) = result {
            let mut errs = errs.lock();
            for index in *start..start + chunk.len() {
                errs.insert(index, err.clone());
            }
        }
    });

    // reference adds cannot move vectors, so there is no index phase
    errs.into_inner()
}
