//! Resource helpers shared by sources, readers and writers.

use crate::config::ConnectionConfig;
use crate::error::MongoResult;
use crate::store::traits::{MongoConnection, MongoConnector};
use log::warn;

/// A connection that is closed when the guard goes out of scope.
///
/// Used for the short-lived administrative calls (`collStats`, `splitVector`) so the
/// connection is released on the success path and on every `?` early return alike.
pub struct ScopedConnection {
    inner: Box<dyn MongoConnection>,
}

impl ScopedConnection {
    /// # Errors
    ///
    /// Propagates the connector's error if the connection cannot be opened.
    pub fn open(connector: &dyn MongoConnector, config: &ConnectionConfig) -> MongoResult<Self> {
        Ok(Self {
            inner: connector.connect(config)?,
        })
    }

    pub fn connection(&mut self) -> &mut dyn MongoConnection {
        self.inner.as_mut()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        log_close_failure("MongoDB connection", self.inner.close());
    }
}

/// Run `f` with a fresh connection that is released before returning.
///
/// # Errors
///
/// Returns the connector's error if the connection cannot be opened, or `f`'s error.
pub fn with_connection<T>(
    connector: &dyn MongoConnector,
    config: &ConnectionConfig,
    f: impl FnOnce(&mut dyn MongoConnection) -> MongoResult<T>,
) -> MongoResult<T> {
    let mut scoped = ScopedConnection::open(connector, config)?;
    f(scoped.connection())
}

/// Release failures never propagate; they are reported here and dropped.
pub(crate) fn log_close_failure(what: &str, result: MongoResult<()>) {
    if let Err(e) = result {
        warn!("Error closing {what}: {e}");
    }
}
