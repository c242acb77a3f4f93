//! # ironbeam-mongodb
//!
//! A **bounded MongoDB connector** for batch pipelines: read a collection as a set of
//! independent, parallel partitions, and write documents back in bulk.
//!
//! ## Key Features
//!
//! - **Partitioned reads** - split a collection on `_id` boundaries with `splitVector`
//! - **Filters and projections** - user filters are preserved inside every partition
//! - **Batched writes** - `insert_many` per batch, ordered or unordered
//! - **Explicit lifecycles** - readers and writers release connections on every path
//! - **Pluggable store** - the driver is a trait; a `mongodb` crate backend and an in-memory
//!   store ship behind features
//! - **Sequential and parallel execution** - a small rayon-based runner
//!
//! ## Quick Start
//!
//! ```
//! use bson::doc;
//! # #[cfg(feature = "memory-store")]
//! use ironbeam_mongodb::store::InMemoryMongo;
//! use ironbeam_mongodb::*;
//! use std::sync::Arc;
//! # use anyhow::Result;
//!
//! # #[cfg(not(feature = "memory-store"))]
//! # fn main() {}
//! # #[cfg(feature = "memory-store")]
//! # fn main() -> Result<()> {
//! let store = InMemoryMongo::new();
//! store.insert_documents(
//!     "shop",
//!     "orders",
//!     (0..10).map(|i| doc! { "_id": i, "total": i * 10 }).collect(),
//! );
//! let connector: Arc<dyn store::MongoConnector> = Arc::new(store.clone());
//!
//! // Read every order above 40, split into partitions.
//! let spec = ReadSpec::new("mongodb://localhost:27017", "shop", "orders")
//!     .with_filter(r#"{"total": {"$gt": 40}}"#);
//! let source = MongoSource::new(spec, Arc::clone(&connector))?;
//! let docs = Runner::default().read(&source)?;
//! assert_eq!(docs.len(), 5);
//!
//! // Copy them somewhere else in batches of two.
//! let sink = WriteSpec::new("mongodb://localhost:27017", "shop", "big_orders")
//!     .with_batch_size(2);
//! Runner::sequential().write(&sink, connector, docs, 100)?;
//! assert_eq!(store.count("shop", "big_orders"), 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Sources and partitions
//!
//! A [`MongoSource`] is one `_id` range of a collection. [`BoundedSource::split`] cuts it
//! into contiguous, disjoint ranges whose union is the whole collection (restricted by the
//! user filter, if any). Each range is read by its own [`MongoReader`].
//!
//! ### Readers
//!
//! [`MongoReader`] follows the [`BoundedReader`] pull protocol (`start`, `advance`,
//! `current`, `close`). [`MongoReader::documents`] turns it into an iterator.
//!
//! ### Writers
//!
//! [`MongoWriter`] buffers documents and flushes them with one bulk insert per batch. Its
//! lifecycle (`setup`, `start_bundle`, `process`, `finish_bundle`, `teardown`) mirrors what
//! an execution framework drives per worker.
//!
//! ### Store
//!
//! Everything that talks to a server goes through the [`store`] traits. Enable the default
//! `memory-store` feature for [`store::InMemoryMongo`], or the `driver` feature for
//! `store::DriverConnector`, which connects through the official `mongodb` crate.
//!
//! ## Execution Modes
//!
//! - [`ExecMode::Sequential`] - all partitions on the calling thread
//! - [`ExecMode::Parallel`] - partitions on the rayon pool
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger.

pub mod bounded;
pub mod config;
pub mod error;
pub mod filter;
pub mod io;
pub mod metrics;
pub mod reader;
pub mod runner;
pub mod source;
pub mod store;
pub mod writer;

// Re-exports for a compact public API
pub use bounded::{BoundedReader, BoundedSource, Documents};
pub use config::{ConnectionConfig, ReadSpec, TlsSettings, WriteSpec};
pub use error::{BulkWriteFailure, ErrorKind, MongoIOError, MongoResult, WriteFailure};
pub use filter::{parse_filter, range_filter, split_keys_to_filters};
pub use io::MongoIO;
pub use metrics::{IoMetrics, MetricsSnapshot};
pub use reader::{MongoReader, ReaderState};
pub use runner::{ExecMode, Runner};
pub use source::MongoSource;
pub use writer::{MongoWriter, WriterState};
