//! Entry points.
//!
//! ```
//! # #[cfg(feature = "memory-store")] {
//! use ironbeam_mongodb::store::{InMemoryMongo, MongoConnector};
//! use ironbeam_mongodb::{MongoIO, ReadSpec, WriteSpec};
//! use std::sync::Arc;
//!
//! let connector: Arc<dyn MongoConnector> = Arc::new(InMemoryMongo::new());
//! let source = MongoIO::read(
//!     ReadSpec::new("mongodb://localhost", "db", "in").with_num_splits(4),
//!     Arc::clone(&connector),
//! )
//! .unwrap();
//! let writer = MongoIO::write(WriteSpec::new("mongodb://localhost", "db", "out"), connector);
//! assert!(writer.is_ok());
//! assert_eq!(source.spec().num_splits, 4);
//!
//! // invalid configurations never reach the store
//! let missing = ReadSpec::default().with_database("db");
//! assert!(MongoIO::read(missing, Arc::new(InMemoryMongo::new())).is_err());
//! # }
//! ```

use crate::config::{ReadSpec, WriteSpec};
use crate::error::MongoResult;
use crate::source::MongoSource;
use crate::store::MongoConnector;
use crate::writer::MongoWriter;
use std::sync::Arc;

/// Validating constructors for sources and sinks.
pub struct MongoIO;

impl MongoIO {
    /// A source over the whole of `spec`'s collection.
    ///
    /// # Errors
    ///
    /// Returns a configuration error listing every invalid field.
    pub fn read(spec: ReadSpec, connector: Arc<dyn MongoConnector>) -> MongoResult<MongoSource> {
        MongoSource::new(spec, connector)
    }

    /// A writer for one worker. Call [`MongoWriter::setup`] before use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error listing every invalid field.
    pub fn write(spec: WriteSpec, connector: Arc<dyn MongoConnector>) -> MongoResult<MongoWriter> {
        MongoWriter::new(spec, connector)
    }
}
