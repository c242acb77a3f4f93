// Integration tests for the in-memory store
//
// The connector's own tests lean on this store to stand in for a server, so its query
// evaluation and admin commands are checked here directly.

#![cfg(feature = "memory-store")]

use anyhow::Result;
use bson::{Bson, Document, doc};
use ironbeam_mongodb::store::memory::document_size;
use ironbeam_mongodb::store::{
    FindRequest, InMemoryMongo, MongoConnection, MongoConnector, MongoCursor,
};
use ironbeam_mongodb::{ConnectionConfig, ErrorKind};

mod common;
use common::{DB, URI, ids, numbered, padded, store_with};

fn open(store: &InMemoryMongo) -> Result<Box<dyn MongoConnection>> {
    Ok(store.connect(&ConnectionConfig::new(URI))?)
}

fn query(store: &InMemoryMongo, filter: Document) -> Result<Vec<Document>> {
    let mut conn = open(store)?;
    let mut cursor = conn.find(DB, "items", FindRequest::new(Some(filter), None))?;
    let mut out = Vec::new();
    while let Some(doc) = cursor.try_next()? {
        out.push(doc);
    }
    cursor.close()?;
    conn.close()?;
    Ok(out)
}

fn people() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "name": "ada", "age": 36, "tags": ["math", "code"], "addr": { "city": "london" } },
        doc! { "_id": 2, "name": "alan", "age": 41, "tags": ["code"], "addr": { "city": "manchester" } },
        doc! { "_id": 3, "name": "grace", "age": 85, "tags": [] },
        doc! { "_id": 4, "name": "edsger", "age": Bson::Null },
    ]
}

// ============================================================================
// Query evaluation
// ============================================================================

#[test]
fn test_equality_and_comparison_operators() -> Result<()> {
    let store = store_with("items", people());
    assert_eq!(ids(&query(&store, doc! { "name": "ada" })?), vec![1]);
    assert_eq!(ids(&query(&store, doc! { "age": { "$gt": 40 } })?), vec![2, 3]);
    assert_eq!(ids(&query(&store, doc! { "age": { "$gte": 41, "$lt": 85 } })?), vec![2]);
    assert_eq!(ids(&query(&store, doc! { "age": { "$lte": 36.0 } })?), vec![1]);
    assert_eq!(ids(&query(&store, doc! { "name": { "$ne": "ada" } })?), vec![2, 3, 4]);
    assert_eq!(ids(&query(&store, doc! { "name": { "$eq": "grace" } })?), vec![3]);
    Ok(())
}

#[test]
fn test_set_and_existence_operators() -> Result<()> {
    let store = store_with("items", people());
    assert_eq!(ids(&query(&store, doc! { "name": { "$in": ["ada", "grace"] } })?), vec![1, 3]);
    assert_eq!(ids(&query(&store, doc! { "name": { "$nin": ["ada", "grace"] } })?), vec![2, 4]);
    assert_eq!(ids(&query(&store, doc! { "addr": { "$exists": true } })?), vec![1, 2]);
    assert_eq!(ids(&query(&store, doc! { "addr": { "$exists": false } })?), vec![3, 4]);
    Ok(())
}

#[test]
fn test_logical_operators() -> Result<()> {
    let store = store_with("items", people());
    let filter = doc! { "$or": [ { "age": { "$lt": 40 } }, { "name": "grace" } ] };
    assert_eq!(ids(&query(&store, filter)?), vec![1, 3]);

    let filter = doc! { "$and": [ { "_id": { "$gt": 1 } }, { "_id": { "$lte": 3 } } ] };
    assert_eq!(ids(&query(&store, filter)?), vec![2, 3]);

    let filter = doc! { "$nor": [ { "_id": 1 }, { "_id": 2 } ] };
    assert_eq!(ids(&query(&store, filter)?), vec![3, 4]);
    Ok(())
}

#[test]
fn test_dotted_paths_arrays_and_null() -> Result<()> {
    let store = store_with("items", people());
    assert_eq!(ids(&query(&store, doc! { "addr.city": "london" })?), vec![1]);
    assert_eq!(ids(&query(&store, doc! { "tags": "code" })?), vec![1, 2]);
    assert_eq!(ids(&query(&store, doc! { "tags": [] })?), vec![3]);
    // null matches explicit nulls and missing fields
    assert_eq!(ids(&query(&store, doc! { "age": Bson::Null })?), vec![4]);
    assert_eq!(ids(&query(&store, doc! { "addr": Bson::Null })?), vec![3, 4]);
    Ok(())
}

#[test]
fn test_comparisons_stay_within_type() -> Result<()> {
    let store = store_with(
        "items",
        vec![doc! { "_id": 1, "v": 5 }, doc! { "_id": 2, "v": "5" }, doc! { "_id": 3, "v": 7_i64 }],
    );
    assert_eq!(ids(&query(&store, doc! { "v": { "$gte": 5 } })?), vec![1, 3]);
    assert_eq!(ids(&query(&store, doc! { "v": { "$gte": "0" } })?), vec![2]);
    Ok(())
}

#[test]
fn test_unknown_operator_is_query_error() -> Result<()> {
    let store = store_with("items", people());
    let err = query(&store, doc! { "name": { "$regex": "a" } }).unwrap_err();
    let err = err.downcast::<ironbeam_mongodb::MongoIOError>()?;
    assert_eq!(err.kind, ErrorKind::Query);
    Ok(())
}

#[test]
fn test_projection_keeps_id_and_listed_fields() -> Result<()> {
    let store = store_with("items", people());
    let mut conn = open(&store)?;
    let fields = vec!["name".to_string(), "missing".to_string()];
    let mut cursor = conn.find(DB, "items", FindRequest::new(None, Some(&fields)))?;
    let first = cursor.try_next()?.expect("a document");
    assert_eq!(first, doc! { "_id": 1, "name": "ada" });
    cursor.close()?;
    conn.close()?;
    Ok(())
}

// ============================================================================
// Admin commands
// ============================================================================

#[test]
fn test_coll_stats_reports_bson_size() -> Result<()> {
    let docs = numbered(7);
    let size: u64 = docs.iter().map(document_size).sum();
    let store = store_with("items", docs);
    let mut conn = open(&store)?;
    let reply = conn.run_command(DB, doc! { "collStats": "items" })?;
    assert_eq!(reply.get_i64("size")?, i64::try_from(size)?);
    assert_eq!(reply.get_i64("count")?, 7);
    assert_eq!(reply.get_str("ns")?, "test.items");
    conn.close()?;
    Ok(())
}

#[test]
fn test_split_vector_cuts_by_size() -> Result<()> {
    // ten ~300 KiB documents with 1 MiB chunks: a key every fourth document
    let store = store_with("items", padded(10, 300 * 1024));
    let mut conn = open(&store)?;
    let reply = conn.run_command(
        DB,
        doc! { "splitVector": "test.items", "keyPattern": { "_id": 1 }, "force": false, "maxChunkSize": 1_i64 },
    )?;
    let keys = reply.get_array("splitKeys")?;
    assert_eq!(
        keys,
        &vec![Bson::Document(doc! { "_id": 3 }), Bson::Document(doc! { "_id": 7 })]
    );
    conn.close()?;
    Ok(())
}

#[test]
fn test_split_vector_rejects_bad_chunk_size() -> Result<()> {
    let store = store_with("items", numbered(3));
    let mut conn = open(&store)?;
    for size in [Bson::Int64(0), Bson::Int32(-1), Bson::String("1".into())] {
        let err = conn
            .run_command(DB, doc! { "splitVector": "test.items", "maxChunkSize": size })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Command);
    }
    let err = conn.run_command(DB, doc! { "ping": 1 }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Command);
    conn.close()?;
    Ok(())
}

// ============================================================================
// Inserts
// ============================================================================

#[test]
fn test_insert_many_assigns_ids() -> Result<()> {
    let store = InMemoryMongo::new();
    let mut conn = open(&store)?;
    let result = conn.insert_many(DB, "items", vec![doc! { "a": 1 }, doc! { "_id": 9, "a": 2 }], true)?;
    assert_eq!(result.inserted_ids.len(), 2);
    assert!(matches!(result.inserted_ids[0], Bson::ObjectId(_)));
    assert_eq!(result.inserted_ids[1], Bson::Int32(9));

    let stored = store.documents(DB, "items");
    assert_eq!(stored[0].keys().next().map(String::as_str), Some("_id"));
    conn.close()?;
    Ok(())
}

#[test]
fn test_duplicate_keys_ordered_and_unordered() -> Result<()> {
    let batch = vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }];

    let store = InMemoryMongo::new();
    let mut conn = open(&store)?;
    let err = conn.insert_many(DB, "items", batch.clone(), true).unwrap_err();
    let failure = err.bulk_write.expect("details");
    assert_eq!(failure.inserted_count, 1);
    assert_eq!(failure.write_errors[0].index, 1);
    assert_eq!(store.count(DB, "items"), 1);
    conn.close()?;

    let store = InMemoryMongo::new();
    let mut conn = open(&store)?;
    let err = conn.insert_many(DB, "items", batch, false).unwrap_err();
    assert_eq!(err.bulk_write.expect("details").inserted_count, 2);
    assert_eq!(store.count(DB, "items"), 2);
    conn.close()?;
    Ok(())
}

#[test]
fn test_injected_insert_failure_touches_nothing() -> Result<()> {
    let store = InMemoryMongo::new();
    store.fail_insert_many(Some(ErrorKind::Connectivity));
    let mut conn = open(&store)?;
    let err = conn.insert_many(DB, "items", numbered(3), true).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connectivity);
    assert_eq!(store.count(DB, "items"), 0);
    assert_eq!(store.insert_calls().len(), 1);
    conn.close()?;
    Ok(())
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn test_closed_connection_and_double_close() -> Result<()> {
    let store = store_with("items", numbered(2));
    let mut conn = open(&store)?;
    conn.close()?;
    assert_eq!(
        conn.run_command(DB, doc! { "collStats": "items" }).unwrap_err().kind,
        ErrorKind::Connectivity
    );
    assert_eq!(conn.close().unwrap_err().kind, ErrorKind::Close);
    assert_eq!(store.stats().connections_closed, 2);
    Ok(())
}

#[test]
fn test_bad_uri_is_connectivity_error() {
    let store = InMemoryMongo::new();
    let err = store.connect(&ConnectionConfig::new("postgres://nope")).err().expect("refused");
    assert_eq!(err.kind, ErrorKind::Connectivity);
    assert_eq!(store.connection_configs().len(), 1);
}

#[test]
fn test_clones_share_state() -> Result<()> {
    let store = InMemoryMongo::new();
    let other = store.clone();
    other.insert_documents(DB, "items", numbered(3));
    assert_eq!(store.count(DB, "items"), 3);
    let mut conn = open(&store)?;
    conn.close()?;
    assert_eq!(other.stats().connections_opened, 1);
    Ok(())
}
