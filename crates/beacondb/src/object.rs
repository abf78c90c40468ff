use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Top-level entity tag. Things and Actions share one attribute set and one
/// storage layout; the kind is persisted with the object and namespaces both
/// keys and beacons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Thing,
    Action,
}

impl Kind {
    pub fn plural(self) -> &'static str {
        match self {
            Kind::Thing => "things",
            Kind::Action => "actions",
        }
    }

    pub fn from_plural(s: &str) -> Option<Kind> {
        match s {
            "things" => Some(Kind::Thing),
            "actions" => Some(Kind::Action),
            _ => None,
        }
    }

    pub(crate) fn as_byte(self) -> u8 {
        match self {
            Kind::Thing => 1,
            Kind::Action => 2,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Kind> {
        match b {
            1 => Some(Kind::Thing),
            2 => Some(Kind::Action),
            _ => None,
        }
    }
}

/// URI-form reference to another object: `weaviate://localhost/<kind-plural>/<uuid>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Beacon {
    pub kind: Kind,
    pub uuid: Uuid,
}

const BEACON_HOST: &str = "weaviate://localhost/";

impl Beacon {
    pub fn new(kind: Kind, uuid: Uuid) -> Self {
        Self { kind, uuid }
    }

    pub fn to_uri(self) -> String {
        format!("{BEACON_HOST}{}/{}", self.kind.plural(), self.uuid)
    }

    pub fn parse(uri: &str) -> Result<Beacon> {
        let rest = uri
            .strip_prefix(BEACON_HOST)
            .ok_or_else(|| Error::invalid_input(format!("invalid beacon scheme: {uri}")))?;
        let (plural, id) = rest
            .split_once('/')
            .ok_or_else(|| Error::invalid_input(format!("invalid beacon path: {uri}")))?;
        let kind = Kind::from_plural(plural)
            .ok_or_else(|| Error::invalid_input(format!("invalid beacon kind: {plural}")))?;
        let uuid = Uuid::parse_str(id)
            .map_err(|_| Error::invalid_input(format!("invalid beacon uuid: {id}")))?;
        Ok(Beacon { kind, uuid })
    }
}

/// Classification metadata attached to a single reference by the (external)
/// classifier. Surfaced only when the `RefMeta` enrichment is requested.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefClassification {
    pub winning_distance: f32,
    pub losing_distance: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub beacon: Beacon,
    pub classification: Option<RefClassification>,
}

impl Reference {
    pub fn to(kind: Kind, uuid: Uuid) -> Self {
        Self {
            beacon: Beacon::new(kind, uuid),
            classification: None,
        }
    }
}

/// Typed property value. `Unknown` carries payloads written by a newer codec
/// version; they round-trip opaquely through read-modify-write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Number(f64),
    Bool(bool),
    /// Unix epoch nanoseconds.
    Date(i64),
    Geo { lat: f32, lon: f32 },
    Text(String),
    Phone(String),
    SingleRef(Reference),
    MultiRef(Vec<Reference>),
    Unknown { tag: u8, payload: Vec<u8> },
}

/// Object-level classification summary, derived at read time from the
/// references that carry classification metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub classified_fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeighborRef {
    pub uuid: Uuid,
    pub distance: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterpretationToken {
    pub token: String,
    pub weight: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub kind: Kind,
    pub class: String,
    /// Nil means "server-assigned at creation".
    pub uuid: Uuid,
    /// Unix epoch nanoseconds; server-assigned.
    pub created_at: i64,
    pub updated_at: i64,
    pub properties: BTreeMap<String, PropertyValue>,
    pub vector: Vec<f32>,
    /// Shard-local identity in the vector index. Assigned at first insert,
    /// immutable for the object's lifetime; never encoded into the record.
    pub doc_id: Option<u32>,

    // Read-time enrichments; never persisted.
    pub classification: Option<Classification>,
    pub nearest_neighbors: Option<Vec<NeighborRef>>,
    pub feature_projection: Option<Vec<f32>>,
    pub interpretation: Option<Vec<InterpretationToken>>,
}

impl Object {
    pub fn new(kind: Kind, class: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            kind,
            class: class.into(),
            uuid,
            created_at: 0,
            updated_at: 0,
            properties: BTreeMap::new(),
            vector: Vec::new(),
            doc_id: None,
            classification: None,
            nearest_neighbors: None,
            feature_projection: None,
            interpretation: None,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    /// Refresh `updated_at`, keeping it strictly greater than its previous
    /// value even under a coarse or stepping clock.
    pub(crate) fn touch_updated(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at.saturating_add(1));
    }
}

/// Partial update document. Properties overwrite property-wise; multi-refs
/// append to the stored list instead of replacing it. A merge carries a
/// vector only when the caller wants the stored one replaced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeDocument {
    pub kind: Kind,
    pub class: String,
    pub uuid: Uuid,
    pub properties: BTreeMap<String, PropertyValue>,
    pub vector: Option<Vec<f32>>,
}

/// One item of a reference batch: add `to` to the multi-reference property
/// `property` of the source object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReference {
    pub from_kind: Kind,
    pub from_class: String,
    pub from_uuid: Uuid,
    pub property: String,
    pub to: Beacon,
}

impl BatchReference {
    /// The original write path reduces a reference add to a one-property
    /// merge document; reference batches reuse the merge machinery.
    pub(crate) fn to_merge_document(&self) -> MergeDocument {
        let mut properties = BTreeMap::new();
        properties.insert(
            self.property.clone(),
            PropertyValue::MultiRef(vec![Reference {
                beacon: self.to,
                classification: None,
            }]),
        );
        MergeDocument {
            kind: self.from_kind,
            class: self.from_class.clone(),
            uuid: self.from_uuid,
            properties,
            vector: None,
        }
    }
}

/// Caller-selected set of optional response fields. Fields outside the set
/// are zeroed in returned objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSet {
    pub classification: bool,
    pub ref_meta: bool,
    pub vector: bool,
    pub nearest_neighbors: bool,
    pub feature_projection: bool,
    pub interpretation: bool,
}

impl EnrichmentSet {
    pub const NONE: EnrichmentSet = EnrichmentSet {
        classification: false,
        ref_meta: false,
        vector: false,
        nearest_neighbors: false,
        feature_projection: false,
        interpretation: false,
    };

    pub fn all() -> Self {
        Self {
            classification: true,
            ref_meta: true,
            vector: true,
            nearest_neighbors: true,
            feature_projection: true,
            interpretation: true,
        }
    }

    pub fn with_vector() -> Self {
        Self {
            vector: true,
            ..Self::NONE
        }
    }

    /// Parse the caller's include list. Both underscored and camel-cased
    /// spellings are recognized; anything else is rejected.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut set = Self::NONE;
        for item in items {
            match item.as_ref() {
                "classification" => set.classification = true,
                "ref_meta" | "refMeta" => set.ref_meta = true,
                "vector" => set.vector = true,
                "nearest_neighbors" | "nearestNeighbors" => set.nearest_neighbors = true,
                "feature_projection" | "featureProjection" => set.feature_projection = true,
                "interpretation" => set.interpretation = true,
                other => {
                    return Err(Error::invalid_input(format!(
                        "unknown enrichment: {other}"
                    )))
                }
            }
        }
        Ok(set)
    }
}

pub(crate) fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
