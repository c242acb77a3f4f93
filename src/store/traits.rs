//! Capabilities the connector consumes from a MongoDB driver.
//!
//! The connector never speaks the wire protocol itself. Anything that can open a
//! connection, run an admin command, stream a query and bulk-insert documents can back it:
//! a real driver wrapped in a blocking facade, or [`InMemoryMongo`](super::InMemoryMongo)
//! in tests.
//!
//! All calls are synchronous. Implementations backed by an async driver are expected to
//! block internally.

use crate::config::ConnectionConfig;
use crate::error::MongoResult;
use bson::{Bson, Document};

/// Arguments of a `find` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    /// Query document; `None` scans the whole collection.
    pub filter: Option<Document>,
    /// Inclusion projection (`{field: 1, ...}`); `None` returns full documents.
    pub projection: Option<Document>,
}

impl FindRequest {
    #[must_use]
    pub fn new(filter: Option<Document>, fields: Option<&[String]>) -> Self {
        Self {
            filter,
            projection: fields.map(include_fields),
        }
    }
}

/// Build an inclusion projection for the given field names.
#[must_use]
pub fn include_fields(fields: &[String]) -> Document {
    let mut projection = Document::new();
    for field in fields {
        projection.insert(field.clone(), 1_i32);
    }
    projection
}

/// Outcome of a successful bulk insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyResult {
    /// `_id` of each inserted document, in submission order.
    pub inserted_ids: Vec<Bson>,
}

/// Opens connections to a store.
///
/// Shared between every partition of a source, so it must be `Send + Sync`; the
/// connections it hands out are owned by exactly one reader or writer.
pub trait MongoConnector: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns a [`Connectivity`](crate::ErrorKind::Connectivity) error if the store cannot be
    /// reached or the configuration is rejected.
    fn connect(&self, config: &ConnectionConfig) -> MongoResult<Box<dyn MongoConnection>>;
}

/// An open connection owned by a single reader, writer or admin call.
pub trait MongoConnection: Send {
    /// Run an administrative command against `database`.
    ///
    /// # Errors
    ///
    /// Returns a [`Command`](crate::ErrorKind::Command) error if the command fails.
    fn run_command(&mut self, database: &str, command: Document) -> MongoResult<Document>;

    /// Open a cursor over `database.collection`.
    ///
    /// # Errors
    ///
    /// Returns a [`Query`](crate::ErrorKind::Query) error if the query is rejected.
    fn find(
        &mut self,
        database: &str,
        collection: &str,
        request: FindRequest,
    ) -> MongoResult<Box<dyn MongoCursor>>;

    /// Insert `documents` in one request.
    ///
    /// Documents without an `_id` get one assigned by the store.
    ///
    /// # Errors
    ///
    /// Returns a [`BulkWrite`](crate::ErrorKind::BulkWrite) error carrying
    /// [`BulkWriteFailure`](crate::BulkWriteFailure) details when some or all documents were
    /// rejected. With `ordered` the store stops at the first rejection; otherwise it attempts
    /// every document. Other kinds signal that the request itself failed.
    fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> MongoResult<InsertManyResult>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`Close`](crate::ErrorKind::Close) error if the release fails.
    fn close(&mut self) -> MongoResult<()>;
}

/// A server-side cursor.
pub trait MongoCursor: Send {
    /// Fetch the next document, `None` once the cursor is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a [`Query`](crate::ErrorKind::Query) error if the fetch fails.
    fn try_next(&mut self) -> MongoResult<Option<Document>>;

    /// # Errors
    ///
    /// Returns a [`Close`](crate::ErrorKind::Close) error if the release fails.
    fn close(&mut self) -> MongoResult<()>;
}
