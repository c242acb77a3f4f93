//! Sequential reader over one partition.
//!
//! ```text
//!            start() ok                advance() == false
//! NotStarted ----------> Reading ----------------------------> Exhausted
//!     |                    |                                      |
//!     | start() err        |            close()                   |
//!     +------> Failed      +----------------------> Closed <------+
//! ```
//!
//! The connection is opened lazily in [`start`](BoundedReader::start), so creating a reader
//! for every partition up front costs nothing. [`close`](BoundedReader::close) releases the
//! cursor and the connection independently, logs failures instead of returning them, and is
//! also run on drop.

use crate::bounded::{BoundedReader, Documents};
use crate::error::{MongoIOError, MongoResult};
use crate::filter::parse_filter;
use crate::source::MongoSource;
use crate::store::helpers::log_close_failure;
use crate::store::{FindRequest, MongoConnection, MongoCursor};
use bson::Document;

/// Lifecycle position of a [`MongoReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    Reading,
    Exhausted,
    /// `start()` failed; only `close()` is meaningful.
    Failed,
    Closed,
}

/// Reads the documents of one [`MongoSource`] through a single cursor.
pub struct MongoReader {
    source: MongoSource,
    connection: Option<Box<dyn MongoConnection>>,
    cursor: Option<Box<dyn MongoCursor>>,
    current: Option<Document>,
    state: ReaderState,
}

impl MongoReader {
    pub(crate) fn new(source: MongoSource) -> Self {
        Self {
            source,
            connection: None,
            cursor: None,
            current: None,
            state: ReaderState::NotStarted,
        }
    }

    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The source this reader consumes.
    #[must_use]
    pub fn current_source(&self) -> &MongoSource {
        &self.source
    }

    /// Consume the reader as an iterator of documents.
    #[must_use]
    pub fn documents(self) -> Documents<Self> {
        Documents::new(self)
    }

    fn open(&mut self) -> MongoResult<()> {
        let spec = self.source.spec();
        let filter = spec.filter.as_deref().map(parse_filter).transpose()?;
        let request = FindRequest::new(filter, spec.projection.as_deref());

        let connection = self
            .connection
            .insert(self.source.connector().connect(&spec.connection)?);
        if let Some(metrics) = self.source.metrics() {
            metrics.record_connection();
        }
        self.cursor = Some(connection.find(
            spec.database_name(),
            spec.collection_name(),
            request,
        )?);
        Ok(())
    }
}

impl BoundedReader for MongoReader {
    type Output = Document;

    fn start(&mut self) -> MongoResult<bool> {
        if self.state != ReaderState::NotStarted {
            return Err(MongoIOError::invalid_state(format!(
                "start() called on a reader in state {:?}",
                self.state
            )));
        }
        if let Err(e) = self.open() {
            self.state = ReaderState::Failed;
            return Err(e);
        }
        self.state = ReaderState::Reading;
        self.advance()
    }

    fn advance(&mut self) -> MongoResult<bool> {
        match self.state {
            ReaderState::Reading => {}
            ReaderState::Exhausted | ReaderState::Closed => return Ok(false),
            ReaderState::NotStarted => {
                return Err(MongoIOError::invalid_state("advance() called before start()"));
            }
            ReaderState::Failed => {
                return Err(MongoIOError::invalid_state(
                    "advance() called after start() failed",
                ));
            }
        }

        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| MongoIOError::invalid_state("reader has no open cursor"))?;
        match cursor.try_next()? {
            Some(doc) => {
                self.current = Some(doc);
                if let Some(metrics) = self.source.metrics() {
                    metrics.record_read();
                }
                Ok(true)
            }
            None => {
                self.state = ReaderState::Exhausted;
                Ok(false)
            }
        }
    }

    fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            log_close_failure("MongoDB cursor", cursor.close());
        }
        if let Some(mut connection) = self.connection.take() {
            log_close_failure("MongoDB client", connection.close());
        }
        self.state = ReaderState::Closed;
    }
}

impl Drop for MongoReader {
    fn drop(&mut self) {
        self.close();
    }
}
