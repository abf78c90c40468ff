//! `beacondb` is the object-and-vector storage core of a schema-driven,
//! vector-enabled knowledge graph: one shard owning a transactional KV store
//! (durable truth) and a pluggable vector index (derivable), coupled by a
//! batch pipeline with per-chunk transactions.
//!
//! The crate is intentionally opinionated about consistency first:
//! - Object writes are linearizable per shard; the KV commit order is the
//!   observed order.
//! - The vector index follows the object store with bounded lag; an index
//!   failure after a commit surfaces but never rolls the object back.
//! - `uuid → docID` is a bijection for live objects; retired docIDs are
//!   never reused.
//!
//! Collaborators (schema getter, vectorizer, authorizer, lock provider,
//! vector index) are injected at construction; see [`Shard::open`].

pub mod batch;
pub mod codec;
mod docid;
pub mod error;
pub mod index;
mod kv;
pub mod object;
pub mod schema;
pub mod shard;
mod store;

pub use batch::BatchErrors;
pub use error::{Error, Result};
pub use index::{Distance, DocFilter, FlatIndex, Neighbor, VectorIndex};
pub use object::{
    BatchReference, Beacon, Classification, EnrichmentSet, InterpretationToken, Kind,
    MergeDocument, NeighborRef, Object, PropertyValue, RefClassification, Reference,
};
pub use schema::{
    AllowAll, Authorizer, ClassDef, DataType, LocalLocks, LockProvider, MapSchema, NoVectorizer,
    Principal, PropertyDef, SchemaGetter, Vectorizer,
};
pub use shard::{
    Collaborators, OpContext, SearchHit, Shard, ShardConfig, ShardStatsSnapshot,
};
