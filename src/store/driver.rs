//! Store backed by the official `mongodb` driver.
//!
//! [`DriverConnector`] implements the connector traits over the driver's blocking API
//! (`mongodb::sync`). Every [`connect`](MongoConnector::connect) builds a fresh client from
//! the [`ConnectionConfig`], so each reader, writer and admin call owns its own pool and
//! releases it on `close`.
//!
//! ```no_run
//! use ironbeam_mongodb::store::{DriverConnector, MongoConnector};
//! use ironbeam_mongodb::{MongoSource, ReadSpec, Runner};
//! use std::sync::Arc;
//! # fn main() -> anyhow::Result<()> {
//! let connector: Arc<dyn MongoConnector> = Arc::new(DriverConnector);
//! let spec = ReadSpec::new("mongodb://localhost:27017", "shop", "orders");
//! let docs = Runner::default().read(&MongoSource::new(spec, connector)?)?;
//! # let _ = docs;
//! # Ok(())
//! # }
//! ```

use crate::config::ConnectionConfig;
use crate::error::{BulkWriteFailure, ErrorKind, MongoIOError, MongoResult, WriteFailure};
use crate::store::traits::{
    FindRequest, InsertManyResult, MongoConnection, MongoConnector, MongoCursor,
};
use bson::Document;
use log::{debug, warn};
use mongodb::error::{Error as DriverError, ErrorKind as DriverErrorKind};
use mongodb::options::{ClientOptions, FindOptions, InsertManyOptions, Tls, TlsOptions};
use mongodb::sync::{Client, Cursor};
use std::time::Duration;

// ============================================================================
// Client options
// ============================================================================

/// Translate a [`ConnectionConfig`] into driver client options.
///
/// The URI is parsed by the driver (hosts, credentials and URI options), then the
/// connector's own settings are layered on top:
///
/// - `max_idle_ms` becomes the pool's `max_idle_time`
/// - enabled TLS settings replace whatever TLS mode the URI asked for
///
/// The driver always enables TCP keep-alive on its sockets, so `keep_alive = false` has no
/// effect here. With the default rustls backend the driver cannot skip hostname checks
/// alone; `allow_invalid_hostnames` therefore also accepts invalid certificates.
///
/// # Errors
///
/// Returns a [`Configuration`](ErrorKind::Configuration) error if the URI is missing,
/// malformed, or rejected by the driver.
pub fn client_options(config: &ConnectionConfig) -> MongoResult<ClientOptions> {
    let parsed = config.parse_uri()?;
    let uri = config.uri.as_deref().unwrap_or_default();
    let mut options = ClientOptions::parse(uri).run().map_err(|e| {
        MongoIOError::configuration("the driver rejected the connection uri")
            .with_source(format!("{}: {e}", config.redacted_uri()))
    })?;

    options.max_idle_time = Some(Duration::from_millis(config.max_idle_ms));
    if let Some(tls) = config.effective_tls() {
        let mut tls_options = TlsOptions::default();
        let mut allow_invalid = tls.allow_invalid_certificates;
        if tls.allow_invalid_hostnames && !allow_invalid {
            warn!("allow_invalid_hostnames also disables certificate validation");
            allow_invalid = true;
        }
        if allow_invalid {
            tls_options.allow_invalid_certificates = Some(true);
        }
        options.tls = Some(Tls::Enabled(tls_options));
    }
    if !config.keep_alive {
        debug!("keep_alive=false ignored: the driver always enables TCP keep-alive");
    }

    debug!(
        "Client options for {} host(s){}",
        parsed.hosts.len(),
        if parsed.srv { " (SRV)" } else { "" }
    );
    Ok(options)
}

// ============================================================================
// Errors
// ============================================================================

/// Map a driver error onto the connector's categories.
///
/// Network, DNS, server selection, authentication and TLS failures are
/// [`Connectivity`](ErrorKind::Connectivity) errors; anything else takes `fallback`, the
/// kind of the operation that failed.
#[must_use]
pub fn map_driver_error(err: &DriverError, fallback: ErrorKind, context: &str) -> MongoIOError {
    let kind = match err.kind.as_ref() {
        DriverErrorKind::Io(_)
        | DriverErrorKind::ServerSelection { .. }
        | DriverErrorKind::DnsResolve { .. }
        | DriverErrorKind::Authentication { .. }
        | DriverErrorKind::ConnectionPoolCleared { .. }
        | DriverErrorKind::InvalidTlsConfig { .. } => ErrorKind::Connectivity,
        _ => fallback,
    };
    MongoIOError::new(kind, context).with_source(err.to_string())
}

/// Summarize the rejected documents of a bulk insert of `batch_len` documents.
///
/// An ordered insert stops at the first rejection, so everything before it was accepted.
/// An unordered insert attempts every document, so everything not rejected was accepted.
#[must_use]
pub fn bulk_write_failure(
    batch_len: usize,
    ordered: bool,
    mut write_errors: Vec<WriteFailure>,
) -> BulkWriteFailure {
    write_errors.sort_by_key(|e| e.index);
    let inserted_count = if ordered {
        write_errors.first().map_or(batch_len, |e| e.index)
    } else {
        batch_len.saturating_sub(write_errors.len())
    };
    BulkWriteFailure {
        inserted_count,
        write_errors,
    }
}

fn insert_error(err: &DriverError, batch_len: usize, ordered: bool) -> MongoIOError {
    match err.kind.as_ref() {
        DriverErrorKind::InsertMany(failure) => {
            let write_errors = failure
                .write_errors
                .iter()
                .flatten()
                .map(|e| WriteFailure {
                    index: e.index,
                    code: e.code,
                    message: e.message.clone(),
                })
                .collect();
            MongoIOError::bulk_write(bulk_write_failure(batch_len, ordered, write_errors))
                .with_source(err.to_string())
        }
        _ => map_driver_error(err, ErrorKind::Command, "insert_many failed"),
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens a new driver client per connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConnector;

impl MongoConnector for DriverConnector {
    fn connect(&self, config: &ConnectionConfig) -> MongoResult<Box<dyn MongoConnection>> {
        let options = client_options(config)
            .map_err(|e| MongoIOError::new(ErrorKind::Connectivity, e.message))?;
        let client = Client::with_options(options)
            .map_err(|e| map_driver_error(&e, ErrorKind::Connectivity, "creating client"))?;
        debug!("Opened MongoDB client for {}", config.redacted_uri());
        Ok(Box::new(DriverConnection {
            client: Some(client),
        }))
    }
}

struct DriverConnection {
    client: Option<Client>,
}

impl DriverConnection {
    fn client(&self) -> MongoResult<&Client> {
        self.client.as_ref().ok_or_else(|| {
            MongoIOError::new(ErrorKind::Connectivity, "connection already closed")
        })
    }
}

impl MongoConnection for DriverConnection {
    fn run_command(&mut self, database: &str, command: Document) -> MongoResult<Document> {
        self.client()?
            .database(database)
            .run_command(command)
            .run()
            .map_err(|e| map_driver_error(&e, ErrorKind::Command, "command failed"))
    }

    fn find(
        &mut self,
        database: &str,
        collection: &str,
        request: FindRequest,
    ) -> MongoResult<Box<dyn MongoCursor>> {
        let mut options = FindOptions::default();
        options.projection = request.projection;
        let cursor = self
            .client()?
            .database(database)
            .collection::<Document>(collection)
            .find(request.filter.unwrap_or_default())
            .with_options(options)
            .run()
            .map_err(|e| map_driver_error(&e, ErrorKind::Query, "find failed"))?;
        Ok(Box::new(DriverCursor {
            cursor: Some(cursor),
        }))
    }

    fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> MongoResult<InsertManyResult> {
        if documents.is_empty() {
            return Ok(InsertManyResult::default());
        }
        let batch_len = documents.len();
        let mut options = InsertManyOptions::default();
        options.ordered = Some(ordered);
        let result = self
            .client()?
            .database(database)
            .collection::<Document>(collection)
            .insert_many(documents)
            .with_options(options)
            .run()
            .map_err(|e| insert_error(&e, batch_len, ordered))?;

        let mut ids: Vec<_> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyResult {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    fn close(&mut self) -> MongoResult<()> {
        match self.client.take() {
            // dropping the last handle shuts the pool down
            Some(_client) => Ok(()),
            None => Err(MongoIOError::new(
                ErrorKind::Close,
                "connection closed twice",
            )),
        }
    }
}

struct DriverCursor {
    cursor: Option<Cursor<Document>>,
}

impl MongoCursor for DriverCursor {
    fn try_next(&mut self) -> MongoResult<Option<Document>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| MongoIOError::new(ErrorKind::Query, "cursor already closed"))?;
        cursor
            .next()
            .transpose()
            .map_err(|e| map_driver_error(&e, ErrorKind::Query, "cursor fetch failed"))
    }

    fn close(&mut self) -> MongoResult<()> {
        self.cursor = None;
        Ok(())
    }
}
