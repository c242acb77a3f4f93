//! Bounded MongoDB source and partitioning.
//!
//! A [`MongoSource`] describes one range of a collection (initially the whole collection).
//! [`MongoSource::split`] asks the store where to cut, via the `splitVector` admin command,
//! and returns one sibling source per range:
//!
//! 1. With an explicit split count `N`, the target chunk size is `collection size / N`;
//!    otherwise it is the size the caller asked for.
//! 2. The target is clamped to at least [`MIN_CHUNK_SIZE_BYTES`].
//! 3. `splitVector` is run with that size in MiB and `{_id: 1}` as the key pattern.
//! 4. No split keys means the collection is small enough: the source is returned unsplit.
//! 5. Otherwise each range filter from [`split_keys_to_filters`] becomes a new source whose
//!    configuration is identical except for its filter.
//!
//! Every admin call opens its own connection and closes it before returning.

use crate::bounded::BoundedSource;
use crate::config::ReadSpec;
use crate::error::{ErrorKind, MongoIOError, MongoResult};
use crate::filter::{ID_FIELD, split_keys_to_filters};
use crate::metrics::IoMetrics;
use crate::reader::MongoReader;
use crate::store::{MongoConnection, MongoConnector, with_connection};
use bson::{Bson, Document};
use log::debug;
use std::fmt;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// Smallest chunk size handed to `splitVector`.
pub const MIN_CHUNK_SIZE_BYTES: u64 = MIB;

/// Target chunk size for a split.
///
/// `collection_size_bytes` is only consulted when `num_splits > 0`.
#[must_use]
pub fn target_chunk_size(
    desired_bundle_size_bytes: u64,
    num_splits: u32,
    collection_size_bytes: u64,
) -> u64 {
    let target = if num_splits > 0 {
        collection_size_bytes / u64::from(num_splits)
    } else {
        desired_bundle_size_bytes
    };
    target.max(MIN_CHUNK_SIZE_BYTES)
}

/// `collStats` command for `collection`.
#[must_use]
pub fn coll_stats_command(collection: &str) -> Document {
    let mut command = Document::new();
    command.insert("collStats", collection);
    command
}

/// `splitVector` command over `database.collection` keyed on `_id`.
#[must_use]
pub fn split_vector_command(
    database: &str,
    collection: &str,
    max_chunk_size_mb: u64,
) -> Document {
    let mut key_pattern = Document::new();
    key_pattern.insert(ID_FIELD, 1_i32);

    let mut command = Document::new();
    command.insert("splitVector", format!("{database}.{collection}"));
    command.insert("keyPattern", key_pattern);
    command.insert("force", false);
    command.insert(
        "maxChunkSize",
        i64::try_from(max_chunk_size_mb).unwrap_or(i64::MAX),
    );
    command
}

/// A range of a MongoDB collection.
///
/// Sources are immutable; splitting produces independent copies that share only the
/// connector.
#[derive(Clone)]
pub struct MongoSource {
    spec: ReadSpec,
    connector: Arc<dyn MongoConnector>,
    metrics: Option<Arc<IoMetrics>>,
}

impl fmt::Debug for MongoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSource")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl MongoSource {
    /// # Errors
    ///
    /// Returns a configuration error if `spec` does not validate.
    pub fn new(spec: ReadSpec, connector: Arc<dyn MongoConnector>) -> MongoResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            connector,
            metrics: None,
        })
    }

    /// Report partitions, connections and reads to `metrics`; inherited by splits and readers.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<IoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn spec(&self) -> &ReadSpec {
        &self.spec
    }

    pub(crate) fn connector(&self) -> &dyn MongoConnector {
        self.connector.as_ref()
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<IoMetrics>> {
        self.metrics.as_ref()
    }

    #[must_use]
    pub fn display_data(&self) -> Vec<(&'static str, String)> {
        self.spec.display_data()
    }

    fn with_filter(&self, filter: String) -> Self {
        let mut spec = self.spec.clone();
        spec.filter = Some(filter);
        Self {
            spec,
            connector: Arc::clone(&self.connector),
            metrics: self.metrics.clone(),
        }
    }

    fn admin<T>(
        &self,
        f: impl FnOnce(&mut dyn MongoConnection) -> MongoResult<T>,
    ) -> MongoResult<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_connection();
        }
        with_connection(self.connector(), &self.spec.connection, f)
    }
}

impl BoundedSource for MongoSource {
    type Output = Document;
    type Reader = MongoReader;

    fn estimated_size_bytes(&self) -> MongoResult<u64> {
        self.admin(|conn| {
            collection_size(conn, self.spec.database_name(), self.spec.collection_name())
        })
    }

    fn split(&self, desired_bundle_size_bytes: u64) -> MongoResult<Vec<Self>> {
        let database = self.spec.database_name();
        let collection = self.spec.collection_name();
        let num_splits = self.spec.num_splits;

        let split_keys = self.admin(|conn| {
            let collection_size = if num_splits > 0 {
                collection_size(conn, database, collection)?
            } else {
                0
            };
            let chunk_size =
                target_chunk_size(desired_bundle_size_bytes, num_splits, collection_size);
            debug!("Splitting in chunk of {} MB", chunk_size / MIB);
            let command = split_vector_command(database, collection, chunk_size / MIB);
            let reply = conn.run_command(database, command)?;
            split_keys(&reply)
        })?;

        if split_keys.is_empty() {
            debug!("Split keys is low, using an unique source");
            if let Some(metrics) = &self.metrics {
                metrics.record_partitions(1);
            }
            return Ok(vec![self.clone()]);
        }

        debug!("Number of splits is {}", split_keys.len());
        let sources: Vec<Self> = split_keys_to_filters(&split_keys, self.spec.filter.as_deref())?
            .into_iter()
            .map(|filter| self.with_filter(filter))
            .collect();
        if let Some(metrics) = &self.metrics {
            metrics.record_partitions(sources.len());
        }
        Ok(sources)
    }

    fn create_reader(&self) -> MongoReader {
        MongoReader::new(self.clone())
    }
}

fn collection_size(
    conn: &mut dyn MongoConnection,
    database: &str,
    collection: &str,
) -> MongoResult<u64> {
    let stats = conn.run_command(database, coll_stats_command(collection))?;
    let size = match stats.get("size") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        #[allow(clippy::cast_possible_truncation)]
        Some(Bson::Double(n)) if n.is_finite() => *n as i64,
        other => {
            return Err(MongoIOError::new(
                ErrorKind::Command,
                format!("collStats reply has no numeric size: {other:?}"),
            ));
        }
    };
    u64::try_from(size).map_err(|_| {
        MongoIOError::new(
            ErrorKind::Command,
            format!("collStats reported a negative size {size}"),
        )
    })
}

fn split_keys(reply: &Document) -> MongoResult<Vec<Document>> {
    let keys = reply.get_array("splitKeys").map_err(|e| {
        MongoIOError::new(ErrorKind::Command, format!("splitVector reply: {e}"))
            .with_source(reply.to_string())
    })?;
    keys.iter()
        .map(|key| match key {
            Bson::Document(doc) => Ok(doc.clone()),
            other => Err(MongoIOError::new(
                ErrorKind::Command,
                format!("split key is not a document: {other}"),
            )),
        })
        .collect()
}
