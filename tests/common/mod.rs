// Shared fixtures for the integration tests
#![allow(dead_code)]

use bson::{Bson, Document, doc};
use ironbeam_mongodb::store::{InMemoryMongo, MongoConnector};
use ironbeam_mongodb::{MongoSource, ReadSpec, WriteSpec};
use std::sync::Arc;

pub const URI: &str = "mongodb://localhost:27017";
pub const DB: &str = "test";

/// `n` small documents with integer ids `0..n`.
pub fn numbered(n: i32) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            doc! { "_id": i, "n": i, "parity": parity, "name": format!("doc-{i}") }
        })
        .collect()
}

/// `n` documents of roughly `pad_bytes` each, so size-based splitting kicks in.
pub fn padded(n: i32, pad_bytes: usize) -> Vec<Document> {
    (0..n)
        .map(|i| doc! { "_id": i, "pad": "x".repeat(pad_bytes) })
        .collect()
}

pub fn store_with(collection: &str, docs: Vec<Document>) -> InMemoryMongo {
    let store = InMemoryMongo::new();
    store.insert_documents(DB, collection, docs);
    store
}

pub fn connector(store: &InMemoryMongo) -> Arc<dyn MongoConnector> {
    Arc::new(store.clone())
}

pub fn read_spec(collection: &str) -> ReadSpec {
    ReadSpec::new(URI, DB, collection)
}

pub fn write_spec(collection: &str) -> WriteSpec {
    WriteSpec::new(URI, DB, collection)
}

pub fn source(store: &InMemoryMongo, spec: ReadSpec) -> anyhow::Result<MongoSource> {
    Ok(MongoSource::new(spec, connector(store))?)
}

/// Integer ids of `docs`, sorted.
pub fn ids(docs: &[Document]) -> Vec<i64> {
    let mut out: Vec<i64> = docs
        .iter()
        .map(|d| match d.get("_id") {
            Some(Bson::Int32(n)) => i64::from(*n),
            Some(Bson::Int64(n)) => *n,
            other => panic!("unexpected _id {other:?}"),
        })
        .collect();
    out.sort_unstable();
    out
}
