//! Tests for the in-process runner.

#![cfg(feature = "memory-store")]

use anyhow::Result;
use bson::doc;
use ironbeam_mongodb::runner::{ExecMode, Runner};
use ironbeam_mongodb::{IoMetrics, MongoIOError};
use std::sync::Arc;

mod common;
use common::{DB, connector, ids, numbered, padded, read_spec, source, store_with, write_spec};

fn parallel(partitions: usize) -> Runner {
    Runner {
        mode: ExecMode::Parallel {
            threads: None,
            partitions: Some(partitions),
        },
        ..Runner::default()
    }
}

#[test]
fn test_sequential_and_parallel_reads_agree() -> Result<()> {
    let store = store_with("items", numbered(200));
    store.set_split_keys(
        DB,
        "items",
        (1..10).map(|i| doc! { "_id": i * 20 }).collect(),
    );
    let src = source(&store, read_spec("items"))?;

    let seq = Runner::sequential().read(&src)?;
    let par = parallel(4).read(&src)?;

    assert_eq!(ids(&seq), (0..200).collect::<Vec<i64>>());
    // partition order is preserved, so the results match element for element
    assert_eq!(seq, par);

    let stats = store.stats();
    assert_eq!(stats.connections_opened, stats.connections_closed);
    assert_eq!(stats.cursors_opened, 20);
    assert_eq!(stats.cursors_closed, 20);
    Ok(())
}

#[test]
fn test_read_with_filter_and_real_split_points() -> Result<()> {
    let store = store_with("blobs", padded(40, 128 * 1024));
    let spec = read_spec("blobs")
        .with_filter(r#"{"_id": {"$gte": 10}}"#)
        .with_projection(["_id"]);
    let metrics = Arc::new(IoMetrics::new());
    let runner = parallel(5).with_metrics(Arc::clone(&metrics));

    let docs = runner.read(&source(&store, spec)?)?;
    assert_eq!(ids(&docs), (10..40).collect::<Vec<i64>>());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.documents_read, 30);
    assert!(snapshot.partitions > 1);
    assert!(snapshot.elapsed_ms.is_some());
    Ok(())
}

#[test]
fn test_read_failure_carries_partition_context() -> Result<()> {
    let store = store_with("items", numbered(10));
    store.fail_cursor_after(Some(3));
    let err = Runner::sequential()
        .read(&source(&store, read_spec("items"))?)
        .unwrap_err();

    assert!(format!("{err:#}").contains("reading partition 0"), "{err:#}");
    assert!(err.downcast_ref::<MongoIOError>().is_some());
    let stats = store.stats();
    assert_eq!(stats.connections_opened, stats.connections_closed);
    Ok(())
}

#[test]
fn test_parallel_write_shards_across_writers() -> Result<()> {
    let store = store_with("unused", Vec::new());
    let metrics = Arc::new(IoMetrics::new());
    let runner = parallel(4).with_metrics(Arc::clone(&metrics));

    runner.write(
        &write_spec("out").with_batch_size(7),
        connector(&store),
        numbered(100),
        10,
    )?;

    assert_eq!(ids(&store.documents(DB, "out")), (0..100).collect::<Vec<i64>>());
    let stats = store.stats();
    assert_eq!(stats.connections_opened, 4);
    assert_eq!(stats.connections_closed, 4);
    assert!(store.insert_calls().iter().all(|call| call.documents.len() <= 7));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.documents_written, 100);
    assert_eq!(snapshot.connections_opened, 4);
    Ok(())
}

#[test]
fn test_sequential_write_uses_one_writer() -> Result<()> {
    let store = store_with("unused", Vec::new());
    Runner::sequential().write(&write_spec("out").with_batch_size(4), connector(&store), numbered(10), 3)?;

    // bundles of 3 flush their remainder: 3 | 3 | 3 | 1
    let sizes: Vec<usize> = store.insert_calls().iter().map(|c| c.documents.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert_eq!(store.stats().connections_opened, 1);
    Ok(())
}

#[test]
fn test_ordered_write_failure_tears_down_every_writer() -> Result<()> {
    let store = store_with("out", vec![doc! { "_id": 55 }]);
    let err = parallel(3)
        .write(&write_spec("out"), connector(&store), numbered(90), 100)
        .unwrap_err();

    assert!(format!("{err:#}").contains("writer 1"), "{err:#}");
    let inner = err.downcast_ref::<MongoIOError>().expect("store error");
    assert!(inner.is_bulk_write());
    let stats = store.stats();
    assert_eq!(stats.connections_opened, stats.connections_closed);
    Ok(())
}

#[test]
fn test_unordered_write_failure_is_not_fatal() -> Result<()> {
    let store = store_with("out", vec![doc! { "_id": 5 }]);
    Runner::sequential().write(
        &write_spec("out").with_ordered(false),
        connector(&store),
        numbered(10),
        100,
    )?;
    assert_eq!(store.count(DB, "out"), 10);
    Ok(())
}

#[test]
fn test_invalid_write_spec_fails_before_connecting() {
    let store = store_with("unused", Vec::new());
    let err = Runner::sequential()
        .write(&write_spec("$bad"), connector(&store), numbered(3), 10)
        .unwrap_err();
    assert!(format!("{err:#}").contains("'$'"), "{err:#}");
    assert!(store.connection_configs().is_empty());
}

#[test]
fn test_failed_read_is_still_timed() -> Result<()> {
    let store = store_with("items", numbered(10));
    store.fail_cursor_after(Some(3));
    let metrics = Arc::new(IoMetrics::new());
    let runner = Runner::sequential().with_metrics(Arc::clone(&metrics));

    assert!(runner.read(&source(&store, read_spec("items"))?).is_err());
    assert!(metrics.snapshot().elapsed_ms.is_some());
    Ok(())
}

#[test]
fn test_failed_write_is_still_timed() {
    let store = store_with("out", vec![doc! { "_id": 5 }]);
    let metrics = Arc::new(IoMetrics::new());
    let runner = parallel(2).with_metrics(Arc::clone(&metrics));

    let err = runner
        .write(&write_spec("out"), connector(&store), numbered(10), 100)
        .unwrap_err();
    assert!(err.downcast_ref::<MongoIOError>().is_some());
    assert!(metrics.snapshot().elapsed_ms.is_some());
}
