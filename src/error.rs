//! Error type shared by the connector.
//!
//! Every fallible operation on sources, readers, writers and the store traits returns
//! [`MongoResult<T>`]. Errors are categorized by [`ErrorKind`] so callers (and the
//! execution driver) can tell a configuration mistake from a connectivity failure or a
//! bulk-write rejection without string matching.

use std::error::Error;
use std::fmt;

/// Category of a [`MongoIOError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed configuration, raised before any I/O happens.
    Configuration,
    /// The store could not be reached.
    Connectivity,
    /// An administrative command (`collStats`, `splitVector`) failed or replied unexpectedly.
    Command,
    /// Opening or iterating a cursor failed.
    Query,
    /// A bulk insert was rejected in whole or in part.
    BulkWrite,
    /// A lifecycle method was called out of order.
    InvalidState,
    /// Releasing a cursor or connection failed.
    Close,
}

/// A single rejected document inside a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Store-reported error code (e.g. `11000` for a duplicate key).
    pub code: i32,
    pub message: String,
}

/// Details attached to an [`ErrorKind::BulkWrite`] error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkWriteFailure {
    /// Number of documents the store accepted before (ordered) or despite (unordered) the
    /// failures.
    pub inserted_count: usize,
    pub write_errors: Vec<WriteFailure>,
}

/// Error returned by connector operations.
#[derive(Debug, Clone)]
pub struct MongoIOError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<String>,
    pub bulk_write: Option<BulkWriteFailure>,
}

impl fmt::Display for MongoIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl Error for MongoIOError {}

impl MongoIOError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            bulk_write: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Build a bulk-write error carrying the per-document failures.
    pub fn bulk_write(failure: BulkWriteFailure) -> Self {
        let message = format!(
            "bulk write failed: {} inserted, {} rejected",
            failure.inserted_count,
            failure.write_errors.len()
        );
        Self {
            kind: ErrorKind::BulkWrite,
            message,
            source: None,
            bulk_write: Some(failure),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn is_bulk_write(&self) -> bool {
        self.kind == ErrorKind::BulkWrite
    }
}

pub type MongoResult<T> = Result<T, MongoIOError>;
