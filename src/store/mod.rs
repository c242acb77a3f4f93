//! Store abstraction.
//!
//! The connector consumes a MongoDB deployment through three small traits:
//!
//! - [`MongoConnector`] - opens connections from a [`ConnectionConfig`](crate::ConnectionConfig)
//! - [`MongoConnection`] - admin commands, `find`, `insert_many`, `close`
//! - [`MongoCursor`] - pull documents one at a time, `close`
//!
//! ## Design Principles
//!
//! ### Synchronous by Design
//! Like the rest of Ironbeam, every call blocks. A driver-backed implementation can run an
//! async client on an internal runtime and expose the blocking interface.
//!
//! ### One owner per connection
//! A connection is owned by exactly one reader, writer or admin call. Admin calls go through
//! [`with_connection`], which closes the connection before returning.
//!
//! ### In-memory implementation
//! [`InMemoryMongo`] (feature `memory-store`, on by default) keeps collections in memory,
//! evaluates the query operators the connector emits, answers `collStats` and `splitVector`,
//! and records every connection, command and bulk insert so tests can assert on lifecycles.
//!
//! ### Driver implementation
//! [`DriverConnector`] (feature `driver`) talks to a real deployment through the `mongodb`
//! crate's blocking API, with client options built from the connection settings.

#[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
#[cfg(feature = "driver")]
pub mod driver;
pub mod helpers;
#[cfg_attr(docsrs, doc(cfg(feature = "memory-store")))]
#[cfg(feature = "memory-store")]
pub mod memory;
pub mod traits;

#[cfg(feature = "driver")]
pub use driver::DriverConnector;
pub use helpers::{ScopedConnection, with_connection};
#[cfg(feature = "memory-store")]
pub use memory::{InMemoryMongo, InsertCall, StoreStats};
pub use traits::*;
