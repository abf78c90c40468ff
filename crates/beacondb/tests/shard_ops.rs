use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacondb::{
    AllowAll, Authorizer, ClassDef, Collaborators, DataType, Distance, EnrichmentSet, Error,
    FlatIndex, Kind, LocalLocks, MapSchema, MergeDocument, NoVectorizer, Object, OpContext,
    Principal, PropertyDef, PropertyValue, RefClassification, Reference, Result, Shard,
    ShardConfig, VectorIndex,
};
use tempfile::TempDir;
use uuid::Uuid;

const DIM: usize = 3;

fn schema() -> MapSchema {
    MapSchema::new()
        .with_class(
            Kind::Thing,
            ClassDef::new("City")
                .with_property("name", PropertyDef::of(DataType::String))
                .with_property("population", PropertyDef::of(DataType::Int))
                .with_property("description", PropertyDef::of(DataType::Text))
                .with_property("location", PropertyDef::of(DataType::Geo))
                .with_property("inCountry", PropertyDef::of(DataType::SingleRef))
                .with_property("knows", PropertyDef::of(DataType::MultiRef)),
        )
        .with_class(
            Kind::Thing,
            ClassDef::new("Country").with_property("name", PropertyDef::of(DataType::String)),
        )
        .with_class(
            Kind::Action,
            ClassDef::new("Visit").with_property("rating", PropertyDef::of(DataType::Number)),
        )
}

fn open_shard(dir: &TempDir, index: Arc<dyn VectorIndex>) -> Result<Shard> {
    Shard::open(
        dir.path(),
        ShardConfig::new(DIM),
        Collaborators {
            schema: Arc::new(schema()),
            vectorizer: Arc::new(NoVectorizer),
            authorizer: Arc::new(AllowAll),
            locks: Arc::new(LocalLocks::new()),
            vector_index: index,
        },
    )
}

fn open_flat_shard(dir: &TempDir) -> Result<Shard> {
    open_shard(dir, Arc::new(FlatIndex::new(DIM, Distance::L2)))
}

fn city(uuid: Uuid, vector: Vec<f32>) -> Object {
    Object::new(Kind::Thing, "City", uuid).with_vector(vector)
}

fn anyone() -> Principal {
    Principal::new("tester")
}

/// Vector index decorator counting adapter calls; used to prove an operation
/// left the index untouched.
struct CountingIndex {
    inner: FlatIndex,
    adds: AtomicU64,
    deletes: AtomicU64,
}

impl CountingIndex {
    fn new(dim: usize) -> Self {
        Self {
            inner: FlatIndex::new(dim, Distance::L2),
            adds: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl VectorIndex for CountingIndex {
    fn add(&self, doc_id: u32, vector: &[f32]) -> Result<()> {
        self.adds.fetch_add(1, Ordering::Relaxed);
        self.inner.add(doc_id, vector)
    }

    fn delete(&self, doc_id: u32) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete(doc_id)
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<beacondb::DocFilter<'_>>,
    ) -> Result<Vec<beacondb::Neighbor>> {
        self.inner.search(query, k, filter)
    }

    fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        self.inner.wait_until_ready(timeout)
    }
}

/// Adapter whose mutations always fail; reads work.
struct BrokenIndex;

impl VectorIndex for BrokenIndex {
    fn add(&self, _doc_id: u32, _vector: &[f32]) -> Result<()> {
        Err(Error::VectorIndexFailure("adapter offline".into()))
    }

    fn delete(&self, _doc_id: u32) -> Result<()> {
        Err(Error::VectorIndexFailure("adapter offline".into()))
    }

    fn search(
        &self,
        _query: &[f32],
        _k: usize,
        _filter: Option<beacondb::DocFilter<'_>>,
    ) -> Result<Vec<beacondb::Neighbor>> {
        Ok(Vec::new())
    }

    fn wait_until_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

struct DenyAll;

impl Authorizer for DenyAll {
    fn authorize(&self, principal: &Principal, verb: &str, resource: &str) -> Result<()> {
        Err(Error::Forbidden(format!(
            "{} may not {verb} {resource}",
            principal.username
        )))
    }
}

#[test]
fn insert_and_search_round_trip() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::parse_str("11111111-1111-1111-1111-111111111111")?;

    let stored = shard.put_object(&ctx, &anyone(), city(uuid, vec![0.1, 0.2, 0.3]))?;
    assert_eq!(stored.uuid, uuid);
    assert_eq!(stored.doc_id, Some(1));
    assert!(stored.created_at > 0);

    let hits = shard.vector_search(
        &ctx,
        &anyone(),
        Some("City"),
        &[0.1, 0.2, 0.3],
        1,
        None,
        &EnrichmentSet::NONE,
    )?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, uuid);
    assert!(hits[0].distance.abs() < 1e-6);
    Ok(())
}

#[test]
fn merge_preserves_doc_id_and_created_at() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();

    let stored = shard.put_object(&ctx, &anyone(), city(uuid, vec![0.1, 0.2, 0.3]))?;
    let doc_id = stored.doc_id.unwrap();

    let mut properties = BTreeMap::new();
    properties.insert("population".to_string(), PropertyValue::Int(100));
    shard.merge_object(
        &ctx,
        &anyone(),
        MergeDocument {
            kind: Kind::Thing,
            class: "City".into(),
            uuid,
            properties,
            vector: None,
        },
    )?;

    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::all())?;
    assert_eq!(got.doc_id, Some(doc_id));
    assert_eq!(got.created_at, stored.created_at);
    assert!(got.updated_at > got.created_at);
    assert_eq!(got.properties.get("population"), Some(&PropertyValue::Int(100)));
    Ok(())
}

#[test]
fn delete_retires_the_doc_id() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    let stored = shard.put_object(&ctx, &anyone(), city(first, vec![0.0; DIM]))?;
    assert_eq!(stored.doc_id, Some(1));
    shard.delete_object(&ctx, &anyone(), Kind::Thing, first)?;
    assert!(matches!(
        shard.get_object(&ctx, &anyone(), Kind::Thing, first, &EnrichmentSet::NONE),
        Err(Error::NotFound { .. })
    ));

    let stored = shard.put_object(&ctx, &anyone(), city(second, vec![0.0; DIM]))?;
    assert_eq!(stored.doc_id, Some(2));
    Ok(())
}

#[test]
fn doc_ids_survive_reopen_without_reuse() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let survivor = Uuid::new_v4();
    {
        let shard = open_flat_shard(&dir)?;
        let ctx = OpContext::none();
        let doomed = Uuid::new_v4();
        shard.put_object(&ctx, &anyone(), city(doomed, vec![0.0; DIM]))?;
        shard.put_object(&ctx, &anyone(), city(survivor, vec![0.0; DIM]))?;
        shard.delete_object(&ctx, &anyone(), Kind::Thing, doomed)?;
    }

    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, survivor, &EnrichmentSet::NONE)?;
    assert_eq!(got.doc_id, Some(2));
    let fresh = shard.put_object(&ctx, &anyone(), city(Uuid::new_v4(), vec![0.0; DIM]))?;
    assert_eq!(fresh.doc_id, Some(3));
    Ok(())
}

#[test]
fn reference_add_is_vector_neutral() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let index = Arc::new(CountingIndex::new(DIM));
    let shard = open_shard(&dir, index.clone())?;
    let ctx = OpContext::none();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let stored_a = shard.put_object(&ctx, &anyone(), city(a, vec![0.1, 0.0, 0.0]))?;
    shard.put_object(&ctx, &anyone(), city(b, vec![0.0, 0.1, 0.0]))?;
    assert_eq!(index.adds.load(Ordering::Relaxed), 2);

    shard.add_reference(
        &ctx,
        &anyone(),
        Kind::Thing,
        a,
        "knows",
        Reference::to(Kind::Thing, b),
    )?;
    assert_eq!(index.adds.load(Ordering::Relaxed), 2);
    assert_eq!(index.deletes.load(Ordering::Relaxed), 0);

    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, a, &EnrichmentSet::NONE)?;
    assert_eq!(got.doc_id, stored_a.doc_id);
    let Some(PropertyValue::MultiRef(refs)) = got.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].beacon.uuid, b);
    Ok(())
}

#[test]
fn put_twice_equals_update() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();

    let first = shard.put_object(&ctx, &anyone(), city(uuid, vec![0.1, 0.2, 0.3]))?;
    let second = shard.put_object(
        &ctx,
        &anyone(),
        city(uuid, vec![0.4, 0.5, 0.6])
            .with_property("name", PropertyValue::String("Berlin".into())),
    )?;
    assert_eq!(second.doc_id, first.doc_id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);

    // the index now holds the replacement vector
    let hits = shard.vector_search(
        &ctx,
        &anyone(),
        None,
        &[0.4, 0.5, 0.6],
        1,
        None,
        &EnrichmentSet::NONE,
    )?;
    assert_eq!(hits[0].uuid, uuid);
    assert!(hits[0].distance.abs() < 1e-6);
    Ok(())
}

#[test]
fn nil_uuid_gets_server_assigned() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let stored = shard.put_object(&ctx, &anyone(), city(Uuid::nil(), vec![0.0; DIM]))?;
    assert!(!stored.uuid.is_nil());
    assert!(shard
        .get_object(&ctx, &anyone(), Kind::Thing, stored.uuid, &EnrichmentSet::NONE)
        .is_ok());
    Ok(())
}

#[test]
fn wrong_dimension_is_rejected_and_not_persisted() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();

    assert!(matches!(
        shard.put_object(&ctx, &anyone(), city(uuid, vec![0.1, 0.2])),
        Err(Error::InvalidUserInput(_))
    ));
    assert!(matches!(
        shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE),
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn schema_violations_are_invalid_user_input() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();

    // unknown class
    let obj = Object::new(Kind::Thing, "Village", Uuid::new_v4()).with_vector(vec![0.0; DIM]);
    assert!(matches!(
        shard.put_object(&ctx, &anyone(), obj),
        Err(Error::InvalidUserInput(_))
    ));

    // unknown property
    let obj = city(Uuid::new_v4(), vec![0.0; DIM])
        .with_property("mayor", PropertyValue::String("unknown".into()));
    assert!(matches!(
        shard.put_object(&ctx, &anyone(), obj),
        Err(Error::InvalidUserInput(_))
    ));

    // declared type mismatch
    let obj = city(Uuid::new_v4(), vec![0.0; DIM])
        .with_property("population", PropertyValue::String("many".into()));
    assert!(matches!(
        shard.put_object(&ctx, &anyone(), obj),
        Err(Error::InvalidUserInput(_))
    ));
    Ok(())
}

#[test]
fn validate_object_checks_without_persisting() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();
    let obj = city(uuid, vec![0.0; DIM]).with_property("population", PropertyValue::Int(7));

    shard.validate_object(&ctx, &anyone(), &obj)?;
    assert!(matches!(
        shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE),
        Err(Error::NotFound { .. })
    ));

    let bad = obj.with_property("mayor", PropertyValue::Bool(true));
    assert!(matches!(
        shard.validate_object(&ctx, &anyone(), &bad),
        Err(Error::InvalidUserInput(_))
    ));
    Ok(())
}

#[test]
fn update_of_absent_object_is_not_found() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();
    assert!(matches!(
        shard.update_object(&ctx, &anyone(), Kind::Thing, uuid, city(uuid, vec![0.0; DIM])),
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn list_limits_and_ordering() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    for _ in 0..7 {
        shard.put_object(&ctx, &anyone(), city(Uuid::new_v4(), vec![0.0; DIM]))?;
    }

    let all = shard.list_objects(&ctx, &anyone(), Kind::Thing, None, None, &EnrichmentSet::NONE)?;
    assert_eq!(all.len(), 7);
    let doc_ids: Vec<u32> = all.iter().map(|o| o.doc_id.unwrap()).collect();
    assert_eq!(doc_ids, (1..=7).collect::<Vec<u32>>());

    let empty = shard.list_objects(
        &ctx,
        &anyone(),
        Kind::Thing,
        None,
        Some(0),
        &EnrichmentSet::NONE,
    )?;
    assert!(empty.is_empty());

    assert!(matches!(
        shard.list_objects(
            &ctx,
            &anyone(),
            Kind::Thing,
            None,
            Some(10_001),
            &EnrichmentSet::NONE
        ),
        Err(Error::InvalidUserInput(_))
    ));

    let actions =
        shard.list_objects(&ctx, &anyone(), Kind::Action, None, None, &EnrichmentSet::NONE)?;
    assert!(actions.is_empty());
    Ok(())
}

#[test]
fn enrichments_zero_unrequested_fields() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();
    let other = Uuid::new_v4();
    let obj = city(uuid, vec![0.1, 0.2, 0.3])
        .with_property("description", PropertyValue::Text("green old town".into()))
        .with_property(
            "knows",
            PropertyValue::MultiRef(vec![Reference {
                beacon: beacondb::Beacon::new(Kind::Thing, other),
                classification: Some(RefClassification {
                    winning_distance: 0.2,
                    losing_distance: Some(0.8),
                }),
            }]),
        );
    shard.put_object(&ctx, &anyone(), obj)?;
    shard.put_object(&ctx, &anyone(), city(other, vec![0.1, 0.2, 0.4]))?;

    let bare = shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE)?;
    assert!(bare.vector.is_empty());
    assert!(bare.classification.is_none());
    assert!(bare.nearest_neighbors.is_none());
    assert!(bare.feature_projection.is_none());
    assert!(bare.interpretation.is_none());
    let Some(PropertyValue::MultiRef(refs)) = bare.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert!(refs[0].classification.is_none());

    let vector_only =
        shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::with_vector())?;
    assert_eq!(vector_only.vector, vec![0.1, 0.2, 0.3]);
    assert!(vector_only.nearest_neighbors.is_none());

    let rich = shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::all())?;
    assert_eq!(rich.vector, vec![0.1, 0.2, 0.3]);
    let Some(PropertyValue::MultiRef(refs)) = rich.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert!(refs[0].classification.is_some());
    assert_eq!(
        rich.classification.as_ref().unwrap().classified_fields,
        vec!["knows".to_string()]
    );
    let neighbors = rich.nearest_neighbors.as_ref().unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].uuid, other);
    assert_eq!(rich.feature_projection.as_ref().unwrap().len(), 3);
    let tokens = rich.interpretation.as_ref().unwrap();
    assert_eq!(tokens.len(), 3);
    assert!((tokens[0].weight - 1.0 / 3.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn search_boundaries_and_class_filter() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let city_id = Uuid::new_v4();
    let country_id = Uuid::new_v4();
    shard.put_object(&ctx, &anyone(), city(city_id, vec![0.1, 0.0, 0.0]))?;
    shard.put_object(
        &ctx,
        &anyone(),
        Object::new(Kind::Thing, "Country", country_id).with_vector(vec![0.11, 0.0, 0.0]),
    )?;

    assert!(shard
        .vector_search(&ctx, &anyone(), None, &[0.1, 0.0, 0.0], 0, None, &EnrichmentSet::NONE)?
        .is_empty());

    assert!(matches!(
        shard.vector_search(
            &ctx,
            &anyone(),
            None,
            &[0.1, 0.0, 0.0],
            10_001,
            None,
            &EnrichmentSet::NONE
        ),
        Err(Error::InvalidUserInput(_))
    ));

    assert!(matches!(
        shard.vector_search(&ctx, &anyone(), None, &[0.1, 0.0], 1, None, &EnrichmentSet::NONE),
        Err(Error::InvalidUserInput(_))
    ));

    let both = shard.vector_search(
        &ctx,
        &anyone(),
        None,
        &[0.1, 0.0, 0.0],
        10,
        None,
        &EnrichmentSet::NONE,
    )?;
    assert_eq!(both.len(), 2);

    let only_countries = shard.vector_search(
        &ctx,
        &anyone(),
        Some("Country"),
        &[0.1, 0.0, 0.0],
        10,
        None,
        &EnrichmentSet::NONE,
    )?;
    assert_eq!(only_countries.len(), 1);
    assert_eq!(only_countries[0].uuid, country_id);

    let keep_none = |_: u32| false;
    assert!(shard
        .vector_search(
            &ctx,
            &anyone(),
            None,
            &[0.1, 0.0, 0.0],
            10,
            Some(&keep_none),
            &EnrichmentSet::NONE
        )?
        .is_empty());
    Ok(())
}

#[test]
fn merge_with_changed_vector_reindexes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let index = Arc::new(CountingIndex::new(DIM));
    let shard = open_shard(&dir, index.clone())?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();
    shard.put_object(&ctx, &anyone(), city(uuid, vec![0.1, 0.0, 0.0]))?;
    assert_eq!(index.adds.load(Ordering::Relaxed), 1);

    // same vector: merge must not touch the index
    shard.merge_object(
        &ctx,
        &anyone(),
        MergeDocument {
            kind: Kind::Thing,
            class: "City".into(),
            uuid,
            properties: BTreeMap::new(),
            vector: Some(vec![0.1, 0.0, 0.0]),
        },
    )?;
    assert_eq!(index.adds.load(Ordering::Relaxed), 1);

    shard.merge_object(
        &ctx,
        &anyone(),
        MergeDocument {
            kind: Kind::Thing,
            class: "City".into(),
            uuid,
            properties: BTreeMap::new(),
            vector: Some(vec![0.9, 0.0, 0.0]),
        },
    )?;
    assert_eq!(index.adds.load(Ordering::Relaxed), 2);

    let hits = shard.vector_search(
        &ctx,
        &anyone(),
        None,
        &[0.9, 0.0, 0.0],
        1,
        None,
        &EnrichmentSet::NONE,
    )?;
    assert!(hits[0].distance.abs() < 1e-6);
    Ok(())
}

#[test]
fn index_failure_surfaces_but_keeps_the_object() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_shard(&dir, Arc::new(BrokenIndex))?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();

    let err = shard
        .put_object(&ctx, &anyone(), city(uuid, vec![0.0; DIM]))
        .unwrap_err();
    assert!(matches!(err, Error::VectorIndexFailure(_)));

    // KV commit happened first and is retained
    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE)?;
    assert_eq!(got.doc_id, Some(1));
    assert_eq!(shard.stats().vector_index_failures, 1);
    Ok(())
}

#[test]
fn forbidden_principal_cannot_write_or_read() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = Shard::open(
        dir.path(),
        ShardConfig::new(DIM),
        Collaborators {
            schema: Arc::new(schema()),
            vectorizer: Arc::new(NoVectorizer),
            authorizer: Arc::new(DenyAll),
            locks: Arc::new(LocalLocks::new()),
            vector_index: Arc::new(FlatIndex::new(DIM, Distance::L2)),
        },
    )?;
    let ctx = OpContext::none();
    let uuid = Uuid::new_v4();
    assert!(matches!(
        shard.put_object(&ctx, &anyone(), city(uuid, vec![0.0; DIM])),
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        shard.get_object(&ctx, &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE),
        Err(Error::Forbidden(_))
    ));
    Ok(())
}

#[test]
fn reference_ops_validate_the_property_kind() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    shard.put_object(&ctx, &anyone(), city(a, vec![0.0; DIM]))?;

    // single-ref and scalar properties are not valid reference-op targets
    for property in ["inCountry", "population", "nonexistent"] {
        assert!(matches!(
            shard.add_reference(
                &ctx,
                &anyone(),
                Kind::Thing,
                a,
                property,
                Reference::to(Kind::Thing, b)
            ),
            Err(Error::InvalidUserInput(_))
        ));
    }

    // source object must exist
    assert!(matches!(
        shard.add_reference(
            &ctx,
            &anyone(),
            Kind::Thing,
            b,
            "knows",
            Reference::to(Kind::Thing, a)
        ),
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn update_and_delete_references() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    shard.put_object(&ctx, &anyone(), city(a, vec![0.0; DIM]))?;

    shard.update_references(
        &ctx,
        &anyone(),
        Kind::Thing,
        a,
        "knows",
        vec![Reference::to(Kind::Thing, b), Reference::to(Kind::Thing, c)],
    )?;
    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, a, &EnrichmentSet::NONE)?;
    let Some(PropertyValue::MultiRef(refs)) = got.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert_eq!(refs.len(), 2);

    shard.delete_reference(
        &ctx,
        &anyone(),
        Kind::Thing,
        a,
        "knows",
        &Reference::to(Kind::Thing, b),
    )?;
    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, a, &EnrichmentSet::NONE)?;
    let Some(PropertyValue::MultiRef(refs)) = got.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].beacon.uuid, c);
    Ok(())
}

#[test]
fn dangling_references_are_permitted() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let ctx = OpContext::none();
    let a = Uuid::new_v4();
    let ghost = Uuid::new_v4();
    shard.put_object(&ctx, &anyone(), city(a, vec![0.0; DIM]))?;

    // target does not exist; the graph is eventually consistent
    shard.add_reference(
        &ctx,
        &anyone(),
        Kind::Thing,
        a,
        "knows",
        Reference::to(Kind::Thing, ghost),
    )?;
    let got = shard.get_object(&ctx, &anyone(), Kind::Thing, a, &EnrichmentSet::NONE)?;
    let Some(PropertyValue::MultiRef(refs)) = got.properties.get("knows") else {
        panic!("knows should be a multi-ref");
    };
    assert_eq!(refs[0].beacon.uuid, ghost);
    Ok(())
}

#[test]
fn cancelled_context_blocks_writes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shard = open_flat_shard(&dir)?;
    let flag = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let ctx = OpContext::with_cancel_flag(flag);
    let uuid = Uuid::new_v4();

    assert!(matches!(
        shard.put_object(&ctx, &anyone(), city(uuid, vec![0.0; DIM])),
        Err(Error::Transient(_))
    ));
    assert!(matches!(
        shard.get_object(&OpContext::none(), &anyone(), Kind::Thing, uuid, &EnrichmentSet::NONE),
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn reopen_with_other_dimension_fails() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        open_flat_shard(&dir)?;
    }
    let result = Shard::open(
        dir.path(),
        ShardConfig::new(DIM + 1),
        Collaborators {
            schema: Arc::new(schema()),
            vectorizer: Arc::new(NoVectorizer),
            authorizer: Arc::new(AllowAll),
            locks: Arc::new(LocalLocks::new()),
            vector_index: Arc::new(FlatIndex::new(DIM + 1, Distance::L2)),
        },
    );
    assert!(matches!(result, Err(Error::InvalidUserInput(_))));
    Ok(())
}
