//! Batching sink.
//!
//! A [`MongoWriter`] is owned by one worker. The execution driver calls its lifecycle
//! methods in this order:
//!
//! ```text
//! setup() -> ( start_bundle() -> process()* -> finish_bundle() )* -> teardown()
//! ```
//!
//! Documents are buffered and sent as one `insert_many` per batch. With `ordered` set, the
//! store stops at the first rejected document and the error is returned. Unordered batches
//! keep going past rejections; the failure is logged and the batch counts as written.

use crate::config::WriteSpec;
use crate::error::{MongoIOError, MongoResult};
use crate::metrics::IoMetrics;
use crate::store::helpers::log_close_failure;
use crate::store::{MongoConnection, MongoConnector};
use bson::Document;
use log::{trace, warn};
use std::sync::Arc;

/// Lifecycle position of a [`MongoWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    NotSetUp,
    Ready,
    InBundle,
    TornDown,
}

/// Buffers documents and writes them in bulk.
pub struct MongoWriter {
    spec: WriteSpec,
    connector: Arc<dyn MongoConnector>,
    connection: Option<Box<dyn MongoConnection>>,
    batch: Vec<Document>,
    state: WriterState,
    metrics: Option<Arc<IoMetrics>>,
}

impl MongoWriter {
    /// # Errors
    ///
    /// Returns a configuration error if `spec` does not validate.
    pub fn new(spec: WriteSpec, connector: Arc<dyn MongoConnector>) -> MongoResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            connector,
            connection: None,
            batch: Vec::new(),
            state: WriterState::NotSetUp,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<IoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn spec(&self) -> &WriteSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Documents buffered and not yet flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Open the connection used for the rest of the writer's life.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error if called twice, or the connector's error.
    pub fn setup(&mut self) -> MongoResult<()> {
        if self.state != WriterState::NotSetUp {
            return Err(MongoIOError::invalid_state(format!(
                "setup() called on a writer in state {:?}",
                self.state
            )));
        }
        self.connection = Some(self.connector.connect(&self.spec.connection)?);
        if let Some(metrics) = &self.metrics {
            metrics.record_connection();
        }
        self.state = WriterState::Ready;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an invalid-state error unless the writer is set up and outside a bundle.
    pub fn start_bundle(&mut self) -> MongoResult<()> {
        self.expect_state(WriterState::Ready, "start_bundle()")?;
        self.batch.clear();
        self.state = WriterState::InBundle;
        Ok(())
    }

    /// Buffer a copy of `doc`, flushing once the batch is full.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error outside a bundle, or the flush error.
    pub fn process(&mut self, doc: &Document) -> MongoResult<()> {
        self.expect_state(WriterState::InBundle, "process()")?;
        self.batch.push(doc.clone());
        if self.batch.len() as u64 >= self.spec.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an invalid-state error outside a bundle, or the flush error.
    pub fn finish_bundle(&mut self) -> MongoResult<()> {
        self.expect_state(WriterState::InBundle, "finish_bundle()")?;
        self.state = WriterState::Ready;
        self.flush()
    }

    /// Close the connection. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            log_close_failure("MongoDB client", connection.close());
        }
        if !self.batch.is_empty() {
            warn!(
                "Discarding {} unflushed documents on teardown",
                self.batch.len()
            );
            self.batch.clear();
        }
        self.state = WriterState::TornDown;
    }

    fn expect_state(&self, expected: WriterState, call: &str) -> MongoResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MongoIOError::invalid_state(format!(
                "{call} called on a writer in state {:?}",
                self.state
            )))
        }
    }

    fn flush(&mut self) -> MongoResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let documents = std::mem::take(&mut self.batch);
        let submitted = documents.len();
        trace!("Flushing {submitted} documents");

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| MongoIOError::invalid_state("writer has no open connection"))?;
        let result = connection.insert_many(
            self.spec.database_name(),
            self.spec.collection_name(),
            documents,
            self.spec.ordered,
        );

        match result {
            Ok(inserted) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_bulk_insert(inserted.inserted_ids.len());
                }
                Ok(())
            }
            Err(e) if e.is_bulk_write() && !self.spec.ordered => {
                let inserted = e.bulk_write.as_ref().map_or(0, |f| f.inserted_count);
                warn!("Unordered bulk insert wrote {inserted} of {submitted} documents: {e}");
                if let Some(metrics) = &self.metrics {
                    metrics.record_bulk_insert(inserted);
                    metrics.record_suppressed_write_error();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for MongoWriter {
    fn drop(&mut self) {
        self.teardown();
    }
}
