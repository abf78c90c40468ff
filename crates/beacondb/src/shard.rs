//! Shard: the public contract of one storage partition.
//!
//! A shard owns one object store (durable truth) and one vector index
//! (derivable), plus the injected collaborators: schema getter, vectorizer,
//! authorizer and lock provider. Writes commit to the KV store first and
//! update the vector index second; an index failure after commit surfaces as
//! `VectorIndexFailure` and never rolls the object back.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch;
use crate::codec::CODEC_VERSION;
use crate::error::{Error, Result};
use crate::index::{Distance, DocFilter, VectorIndex};
use crate::kv::{ShardMeta, Tables};
use crate::object::{
    now_unix_nanos, Classification, EnrichmentSet, InterpretationToken, Kind, MergeDocument,
    NeighborRef, Object, PropertyValue, Reference,
};
use crate::schema::{Authorizer, ClassDef, DataType, LockProvider, Principal, SchemaGetter, Vectorizer};
use crate::store::ObjectStore;

/// Neighbors returned by the `NearestNeighbors` read enrichment.
const ENRICH_NEIGHBOR_COUNT: usize = 8;
/// Dimensions of the `FeatureProjection` read enrichment.
const ENRICH_PROJECTION_DIMS: usize = 3;

#[derive(Clone, Debug)]
pub struct ShardConfig {
    /// Vector dimension of every object on this shard.
    pub dim: usize,
    pub distance: Distance,
    /// Ceiling on one KV transaction's write set in the batch pipeline.
    pub max_per_transaction: usize,
    pub list_default_limit: usize,
    pub list_max_limit: usize,
    pub search_max_k: usize,
    /// How long startup blocks for the vector index; expiry is fatal.
    pub startup_timeout: Duration,
    /// Sleep ladder of the transient retry loop.
    pub retry_backoff: Vec<Duration>,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            distance: Distance::L2,
            max_per_transaction: 30,
            list_default_limit: 100,
            list_max_limit: 10_000,
            search_max_k: 10_000,
            startup_timeout: Duration::from_secs(120),
            retry_backoff: vec![Duration::from_millis(10), Duration::from_millis(100)],
        }
    }
}

impl ShardConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 || self.dim > u16::MAX as usize {
            return Err(Error::invalid_input(format!(
                "shard dim must be in 1..={}, got {}",
                u16::MAX,
                self.dim
            )));
        }
        if self.max_per_transaction == 0 {
            return Err(Error::invalid_input(
                "max_per_transaction must be > 0".to_string(),
            ));
        }
        if self.list_default_limit == 0 || self.list_default_limit > self.list_max_limit {
            return Err(Error::invalid_input(
                "list_default_limit must be in 1..=list_max_limit".to_string(),
            ));
        }
        if self.search_max_k == 0 {
            return Err(Error::invalid_input("search_max_k must be > 0".to_string()));
        }
        if self.startup_timeout.is_zero() {
            return Err(Error::invalid_input(
                "startup_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cancellation signal and deadline carried by every public operation.
/// Checked before each KV commit and before each vector-index call; an
/// in-flight transaction that observes cancellation aborts without side
/// effects.
#[derive(Clone, Default)]
pub struct OpContext {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancel: None,
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_cancel_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel: Some(flag),
            deadline: None,
        }
    }

    pub fn and_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn check(&self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(Error::Transient("operation cancelled".into()));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Transient("deadline exceeded".into()));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct ShardStats {
    pub puts: AtomicU64,
    pub merges: AtomicU64,
    pub deletes: AtomicU64,
    pub batch_objects: AtomicU64,
    pub batch_chunks: AtomicU64,
    pub searches: AtomicU64,
    pub transient_retries: AtomicU64,
    pub vector_index_failures: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStatsSnapshot {
    pub puts: u64,
    pub merges: u64,
    pub deletes: u64,
    pub batch_objects: u64,
    pub batch_chunks: u64,
    pub searches: u64,
    pub transient_retries: u64,
    pub vector_index_failures: u64,
}

impl ShardStats {
    fn snapshot(&self) -> ShardStatsSnapshot {
        ShardStatsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            batch_objects: self.batch_objects.load(Ordering::Relaxed),
            batch_chunks: self.batch_chunks.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            vector_index_failures: self.vector_index_failures.load(Ordering::Relaxed),
        }
    }
}

/// External subsystems the shard consumes; all injected, none global.
pub struct Collaborators {
    pub schema: Arc<dyn SchemaGetter>,
    pub vectorizer: Arc<dyn Vectorizer>,
    pub authorizer: Arc<dyn Authorizer>,
    pub locks: Arc<dyn LockProvider>,
    pub vector_index: Arc<dyn VectorIndex>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub uuid: Uuid,
    pub distance: f32,
    pub object: Object,
}

pub struct Shard {
    pub(crate) store: ObjectStore,
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) schema: Arc<dyn SchemaGetter>,
    pub(crate) vectorizer: Arc<dyn Vectorizer>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) locks: Arc<dyn LockProvider>,
    pub(crate) cfg: ShardConfig,
    pub(crate) stats: ShardStats,
}

impl Shard {
    /// Open the shard directory and block until the vector index reports
    /// ready; a timeout is fatal.
    pub fn open(path: impl AsRef<Path>, cfg: ShardConfig, collaborators: Collaborators) -> Result<Shard> {
        cfg.validate()?;
        let meta = ShardMeta {
            codec_version: CODEC_VERSION,
            dim: cfg.dim as u16,
            distance: cfg.distance,
        };
        let store = ObjectStore::open(path.as_ref(), meta)?;
        collaborators
            .vector_index
            .wait_until_ready(cfg.startup_timeout)
            .map_err(|err| {
                Error::VectorIndexFailure(format!("vector index not ready at startup: {err}"))
            })?;
        info!(path = %path.as_ref().display(), dim = cfg.dim, "shard opened");
        Ok(Shard {
            store,
            index: collaborators.vector_index,
            schema: collaborators.schema,
            vectorizer: collaborators.vectorizer,
            authorizer: collaborators.authorizer,
            locks: collaborators.locks,
            cfg,
            stats: ShardStats::default(),
        })
    }

    pub fn stats(&self) -> ShardStatsSnapshot {
        self.stats.snapshot()
    }

    // --- single-object writes ---------------------------------------------

    /// Idempotent create: a second put of the same UUID is an update. Returns
    /// the stored object with assigned uuid, docID and timestamps.
    pub fn put_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        mut obj: Object,
    ) -> Result<Object> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        if obj.uuid.is_nil() {
            obj.uuid = Uuid::new_v4();
        }
        self.authorizer
            .authorize(principal, "create", &resource(obj.kind, Some(obj.uuid)))?;
        self.prepare_for_write(&mut obj)?;
        let outcome = self.commit_write(ctx, |tables| {
            self.store.put_in_tx(tables, &mut obj, now_unix_nanos())
        })?;
        ctx.check()?;
        self.index_add(outcome.doc_id, &obj.vector)?;
        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        Ok(obj)
    }

    /// Full replace; `NotFound` when the UUID is absent.
    pub fn update_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
        mut obj: Object,
    ) -> Result<Object> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "update", &resource(kind, Some(uuid)))?;
        obj.kind = kind;
        obj.uuid = uuid;
        self.prepare_for_write(&mut obj)?;
        let doc_id = self.commit_write(ctx, |tables| {
            self.store.update_in_tx(tables, &mut obj, now_unix_nanos())
        })?;
        ctx.check()?;
        self.index_add(doc_id, &obj.vector)?;
        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        Ok(obj)
    }

    /// Partial merge; the vector index is touched only when the merged
    /// vector differs from the stored one.
    pub fn merge_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        doc: MergeDocument,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "update", &resource(doc.kind, Some(doc.uuid)))?;
        let def = self.class_def(doc.kind, &doc.class)?;
        for (name, value) in &doc.properties {
            validate_property(&def, name, value)?;
        }
        if let Some(vector) = &doc.vector {
            self.validate_vector(vector)?;
        }
        let outcome = self.commit_write(ctx, |tables| {
            self.store
                .merge_in_tx(tables, &doc, Some(&def), now_unix_nanos())
        })?;
        if outcome.vector_changed {
            ctx.check()?;
            self.index_add(outcome.doc_id, &outcome.vector)?;
        }
        self.stats.merges.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove the object, retire its docID and delete its index entry.
    pub fn delete_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "delete", &resource(kind, Some(uuid)))?;
        let doc_id =
            self.commit_write(ctx, |tables| self.store.delete_in_tx(tables, kind, uuid))?;
        ctx.check()?;
        self.index
            .delete(doc_id)
            .map_err(|err| self.index_failure("delete", doc_id, err))?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Schema validation without persistence.
    pub fn validate_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        obj: &Object,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "validate", &resource(obj.kind, None))?;
        let def = self.class_def(obj.kind, &obj.class)?;
        for (name, value) in &obj.properties {
            validate_property(&def, name, value)?;
        }
        if !obj.vector.is_empty() {
            self.validate_vector(&obj.vector)?;
        }
        Ok(())
    }

    // --- reference writes -------------------------------------------------

    pub fn add_reference(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        reference: Reference,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "update", &resource(kind, Some(uuid)))?;
        let def = self.ref_property_target(kind, uuid, property)?;
        self.commit_write(ctx, |tables| {
            self.store.add_reference_in_tx(
                tables,
                kind,
                uuid,
                property,
                reference.clone(),
                Some(&def),
                now_unix_nanos(),
            )
        })?;
        // reference adds never move the vector, so the index stays untouched
        Ok(())
    }

    pub fn update_references(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        references: Vec<Reference>,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "update", &resource(kind, Some(uuid)))?;
        self.ref_property_target(kind, uuid, property)?;
        self.commit_write(ctx, |tables| {
            self.store.update_references_in_tx(
                tables,
                kind,
                uuid,
                property,
                references.clone(),
                now_unix_nanos(),
            )
        })
    }

    pub fn delete_reference(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
        property: &str,
        reference: &Reference,
    ) -> Result<()> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "update", &resource(kind, Some(uuid)))?;
        self.ref_property_target(kind, uuid, property)?;
        self.commit_write(ctx, |tables| {
            self.store.delete_reference_in_tx(
                tables,
                kind,
                uuid,
                property,
                reference,
                now_unix_nanos(),
            )
        })
    }

    // --- reads ------------------------------------------------------------

    pub fn get_object(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        uuid: Uuid,
        enrichments: &EnrichmentSet,
    ) -> Result<Object> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "get", &resource(kind, Some(uuid)))?;
        let mut obj = self.store.get(kind, uuid)?;
        self.apply_enrichments(&mut obj, enrichments)?;
        Ok(obj)
    }

    pub fn list_objects(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        kind: Kind,
        class: Option<&str>,
        limit: Option<usize>,
        enrichments: &EnrichmentSet,
    ) -> Result<Vec<Object>> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer
            .authorize(principal, "list", &resource(kind, None))?;
        let limit = match limit {
            None => self.cfg.list_default_limit,
            Some(limit) if limit > self.cfg.list_max_limit => {
                return Err(Error::invalid_input(format!(
                    "list limit {limit} exceeds maximum {}",
                    self.cfg.list_max_limit
                )))
            }
            Some(limit) => limit,
        };
        let mut objects = self.store.list(kind, class, limit)?;
        for obj in &mut objects {
            self.apply_enrichments(obj, enrichments)?;
        }
        Ok(objects)
    }

    /// Nearest-neighbor search: query the index, resolve docIDs to UUIDs,
    /// filter by class if asked, fetch each hit with the requested
    /// enrichments. DocIDs the object store no longer knows are skipped; the
    /// index converges eventually.
    pub fn vector_search(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        class: Option<&str>,
        query: &[f32],
        k: usize,
        filter: Option<DocFilter<'_>>,
        enrichments: &EnrichmentSet,
    ) -> Result<Vec<SearchHit>> {
        ctx.check()?;
        let _schema = self.locks.schema_lock().read();
        self.authorizer.authorize(principal, "get", "objects")?;
        if k > self.cfg.search_max_k {
            return Err(Error::invalid_input(format!(
                "k {k} exceeds maximum {}",
                self.cfg.search_max_k
            )));
        }
        self.validate_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        ctx.check()?;
        let neighbors = self
            .index
            .search(query, k, filter)
            .map_err(|err| Error::VectorIndexFailure(err.to_string()))?;

        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some((kind, uuid)) = self.store.resolve_doc(neighbor.doc_id)? else {
                debug!(doc_id = neighbor.doc_id, "search hit without live mapping, skipped");
                continue;
            };
            let mut obj = match self.store.get(kind, uuid) {
                Ok(obj) => obj,
                Err(Error::NotFound { .. }) => {
                    debug!(%uuid, "search hit vanished between resolve and fetch, skipped");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(class) = class {
                if obj.class != class {
                    continue;
                }
            }
            self.apply_enrichments(&mut obj, enrichments)?;
            hits.push(SearchHit {
                uuid,
                distance: neighbor.distance,
                object: obj,
            });
        }
        self.stats.searches.fetch_add(1, Ordering::Relaxed);
        Ok(hits)
    }

    // --- batches ----------------------------------------------------------

    /// Parallel batch ingestion. The result maps original indices to their
    /// terminal error; absence means success. See the batch module for the
    /// chunking and two-phase pipeline.
    pub fn batch_put_objects(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        objects: Vec<Object>,
    ) -> Result<batch::BatchErrors> {
        let _schema = self.locks.schema_lock().read();
        self.authorizer.authorize(principal, "create", "objects")?;
        Ok(batch::put_object_batch(self, ctx, objects))
    }

    /// Parallel reference batch; never touches the vector index.
    pub fn batch_add_references(
        &self,
        ctx: &OpContext,
        principal: &Principal,
        references: Vec<crate::object::BatchReference>,
    ) -> Result<batch::BatchErrors> {
        let _schema = self.locks.schema_lock().read();
        self.authorizer.authorize(principal, "update", "objects")?;
        Ok(batch::add_references_batch(self, ctx, references))
    }

    // --- internals --------------------------------------------------------

    /// Validate against the schema, fill a missing vector from the
    /// vectorizer, and enforce the shard dimension.
    fn prepare_for_write(&self, obj: &mut Object) -> Result<()> {
        self.validate_against_schema(obj)?;
        if obj.vector.is_empty() {
            obj.vector = self.vectorizer.vectorize(&obj.class, &obj.properties)?;
        }
        self.validate_vector(&obj.vector)?;
        // computed read enrichments never enter the write path
        obj.classification = None;
        obj.nearest_neighbors = None;
        obj.feature_projection = None;
        obj.interpretation = None;
        Ok(())
    }

    pub(crate) fn validate_against_schema(&self, obj: &Object) -> Result<()> {
        let def = self.class_def(obj.kind, &obj.class)?;
        for (name, value) in &obj.properties {
            validate_property(&def, name, value)?;
        }
        Ok(())
    }

    pub(crate) fn class_def(&self, kind: Kind, class: &str) -> Result<ClassDef> {
        self.schema.class(kind, class).ok_or_else(|| {
            Error::invalid_input(format!("unknown {} class: {class}", kind.plural()))
        })
    }

    pub(crate) fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.cfg.dim {
            return Err(Error::invalid_input(format!(
                "vector dim {} does not match shard dim {}",
                vector.len(),
                self.cfg.dim
            )));
        }
        Ok(())
    }

    /// Look up the class of the referenced object and check the property is
    /// a schema-declared multi-reference.
    fn ref_property_target(&self, kind: Kind, uuid: Uuid, property: &str) -> Result<ClassDef> {
        let stored = self.store.get(kind, uuid)?;
        let def = self.class_def(kind, &stored.class)?;
        let Some(prop) = def.properties.get(property) else {
            return Err(Error::invalid_input(format!(
                "unknown property: {property}"
            )));
        };
        if prop.data_type != DataType::MultiRef {
            return Err(Error::invalid_input(format!(
                "property {property} is not a multi-reference"
            )));
        }
        Ok(def)
    }

    /// Run `body` inside one write transaction; commit; retry the whole
    /// attempt on transient failures with the configured backoff ladder.
    pub(crate) fn commit_write<T>(
        &self,
        ctx: &OpContext,
        mut body: impl FnMut(&mut Tables) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0usize;
        loop {
            let result: Result<T> = (|| {
                ctx.check()?;
                let txn = self.store.kv().begin_write()?;
                let out = {
                    let mut tables = Tables::open(&txn)?;
                    body(&mut tables)?
                };
                ctx.check()?;
                txn.commit()?;
                Ok(out)
            })();
            match result {
                Err(err)
                    if err.is_transient()
                        && attempt < self.cfg.retry_backoff.len()
                        && ctx.check().is_ok() =>
                {
                    debug!(%err, attempt, "transient storage error, retrying");
                    self.stats.transient_retries.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(self.cfg.retry_backoff[attempt]);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn index_add(&self, doc_id: u32, vector: &[f32]) -> Result<()> {
        self.index
            .add(doc_id, vector)
            .map_err(|err| self.index_failure("add", doc_id, err))
    }

    fn index_failure(&self, op: &str, doc_id: u32, err: Error) -> Error {
        self.stats
            .vector_index_failures
            .fetch_add(1, Ordering::Relaxed);
        warn!(doc_id, %err, "vector index {op} failed after KV commit; object store retained");
        Error::VectorIndexFailure(format!("{op} docID {doc_id}: {err}"))
    }

    /// Zero fields outside the enrichment set; compute the requested
    /// read-time enrichments. Computation happens before zeroing since
    /// neighbors and projection derive from the vector.
    fn apply_enrichments(&self, obj: &mut Object, set: &EnrichmentSet) -> Result<()> {
        if set.nearest_neighbors {
            obj.nearest_neighbors = Some(self.nearest_neighbors_of(obj)?);
        }
        if set.feature_projection {
            obj.feature_projection = Some(project_vector(&obj.vector, ENRICH_PROJECTION_DIMS));
        }
        if set.interpretation {
            obj.interpretation = Some(interpret_text(obj));
        }
        if set.classification {
            obj.classification = Some(classification_summary(obj));
        }
        if !set.ref_meta {
            strip_ref_meta(obj);
        }
        if !set.vector {
            obj.vector = Vec::new();
        }
        Ok(())
    }

    fn nearest_neighbors_of(&self, obj: &Object) -> Result<Vec<NeighborRef>> {
        if obj.vector.is_empty() {
            return Ok(Vec::new());
        }
        let neighbors = self
            .index
            .search(&obj.vector, ENRICH_NEIGHBOR_COUNT + 1, None)
            .map_err(|err| Error::VectorIndexFailure(err.to_string()))?;
        let mut out = Vec::with_capacity(ENRICH_NEIGHBOR_COUNT);
        for neighbor in neighbors {
            if Some(neighbor.doc_id) == obj.doc_id {
                continue;
            }
            let Some((_, uuid)) = self.store.resolve_doc(neighbor.doc_id)? else {
                continue;
            };
            out.push(NeighborRef {
                uuid,
                distance: neighbor.distance,
            });
            if out.len() == ENRICH_NEIGHBOR_COUNT {
                break;
            }
        }
        Ok(out)
    }
}

fn resource(kind: Kind, uuid: Option<Uuid>) -> String {
    match uuid {
        Some(uuid) => format!("{}/{uuid}", kind.plural()),
        None => kind.plural().to_string(),
    }
}

pub(crate) fn validate_property(def: &ClassDef, name: &str, value: &PropertyValue) -> Result<()> {
    let Some(prop) = def.properties.get(name) else {
        return Err(Error::invalid_input(format!("unknown property: {name}")));
    };
    if let PropertyValue::Unknown { tag, .. } = value {
        return Err(Error::invalid_input(format!(
            "property {name} carries unknown type tag {tag}"
        )));
    }
    if !prop.data_type.matches(value) {
        return Err(Error::invalid_input(format!(
            "property {name} does not match its declared type"
        )));
    }
    Ok(())
}

/// Deterministic signed random projection; enough structure for the
/// low-dimensional preview the enrichment promises.
fn projection_sign(row: usize, col: usize) -> f32 {
    let mut x = (row as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (col as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    if x & 1 == 0 {
        1.0
    } else {
        -1.0
    }
}

fn project_vector(vector: &[f32], dims: usize) -> Vec<f32> {
    if vector.is_empty() {
        return vec![0.0; dims];
    }
    let scale = 1.0 / (vector.len() as f32).sqrt();
    (0..dims)
        .map(|row| {
            vector
                .iter()
                .enumerate()
                .map(|(col, value)| value * projection_sign(row, col))
                .sum::<f32>()
                * scale
        })
        .collect()
}

fn interpret_text(obj: &Object) -> Vec<InterpretationToken> {
    let mut tokens = Vec::new();
    for value in obj.properties.values() {
        let text = match value {
            PropertyValue::String(s) | PropertyValue::Text(s) => s,
            _ => continue,
        };
        for token in text.split_whitespace() {
            tokens.push(token.to_string());
        }
    }
    if tokens.is_empty() {
        return Vec::new();
    }
    let weight = 1.0 / tokens.len() as f32;
    tokens
        .into_iter()
        .map(|token| InterpretationToken { token, weight })
        .collect()
}

fn classification_summary(obj: &Object) -> Classification {
    let mut classified_fields = Vec::new();
    for (name, value) in &obj.properties {
        let classified = match value {
            PropertyValue::SingleRef(r) => r.classification.is_some(),
            PropertyValue::MultiRef(refs) => refs.iter().any(|r| r.classification.is_some()),
            _ => false,
        };
        if classified {
            classified_fields.push(name.clone());
        }
    }
    Classification { classified_fields }
}

fn strip_ref_meta(obj: &mut Object) {
    for value in obj.properties.values_mut() {
        match value {
            PropertyValue::SingleRef(r) => r.classification = None,
            PropertyValue::MultiRef(refs) => {
                for r in refs {
                    r.classification = None;
                }
            }
            _ => {}
        }
    }
}
