//! Connector configuration.
//!
//! Three value types describe everything the connector needs:
//!
//! - [`ConnectionConfig`] - where the store lives and how to talk to it
//! - [`ReadSpec`] - which collection to read, with optional filter, projection and split count
//! - [`WriteSpec`] - which collection to write, batch size and bulk-write ordering
//!
//! All three are plain data: setters are chained by value, and [`ReadSpec::validate`] /
//! [`WriteSpec::validate`] check every field at once, reporting all problems in a single
//! [`ErrorKind::Configuration`](crate::ErrorKind::Configuration) error. They also derive
//! Serde traits so a pipeline can load them from JSON:
//!
//! ```
//! use ironbeam_mongodb::ReadSpec;
//!
//! let spec = ReadSpec::from_json_str(r#"{
//!     "connection": { "uri": "mongodb://localhost:27017" },
//!     "database": "shop",
//!     "collection": "orders",
//!     "num_splits": 4
//! }"#).unwrap();
//! assert_eq!(spec.num_splits, 4);
//! assert!(spec.connection.keep_alive);
//! ```

use crate::error::{MongoIOError, MongoResult};
use crate::filter::parse_filter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Default maximum idle time of a pooled connection, in milliseconds.
pub const DEFAULT_MAX_IDLE_MS: u64 = 60_000;

/// Default number of documents per bulk insert.
pub const DEFAULT_BATCH_SIZE: u64 = 1024;

static URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<scheme>mongodb(?:\+srv)?)://(?:(?P<user>[^:@/]+)(?::(?P<password>[^@/]*))?@)?(?P<hosts>[^/?@]+)(?:/(?P<database>[^?]*))?(?:\?(?P<options>.*))?$",
    )
    .expect("URI pattern is valid")
});

// ============================================================================
// Connection
// ============================================================================

/// TLS settings. The two relaxation flags only take effect when `enabled` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub allow_invalid_hostnames: bool,
    pub allow_invalid_certificates: bool,
}

/// How to reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `mongodb://[user[:password]@]host1[:port1][,hostN[:portN]][/[database][?options]]`
    pub uri: Option<String>,
    pub keep_alive: bool,
    pub max_idle_ms: u64,
    pub tls: TlsSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: None,
            keep_alive: true,
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            tls: TlsSettings::default(),
        }
    }
}

/// Components of a parsed connection URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub srv: bool,
    pub username: Option<String>,
    pub has_password: bool,
    pub hosts: Vec<String>,
    pub auth_database: Option<String>,
    pub options: Option<String>,
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Load connection settings from `{prefix}_URI`, `{prefix}_KEEP_ALIVE`,
    /// `{prefix}_MAX_IDLE_MS`, `{prefix}_TLS`, `{prefix}_TLS_ALLOW_INVALID_HOSTNAMES` and
    /// `{prefix}_TLS_ALLOW_INVALID_CERTIFICATES`. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a flag is not a boolean or the idle time is not a
    /// non-negative integer.
    pub fn from_env(prefix: &str) -> MongoResult<Self> {
        let var = |name: &str| std::env::var(format!("{prefix}_{name}")).ok();
        let flag = |name: &str, default: bool| -> MongoResult<bool> {
            match var(name) {
                None => Ok(default),
                Some(raw) => parse_bool(&raw).ok_or_else(|| {
                    MongoIOError::configuration(format!(
                        "{prefix}_{name} must be a boolean, got '{raw}'"
                    ))
                }),
            }
        };

        let defaults = Self::default();
        let max_idle_ms = match var("MAX_IDLE_MS") {
            None => defaults.max_idle_ms,
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                MongoIOError::configuration(format!(
                    "{prefix}_MAX_IDLE_MS must be a non-negative integer, got '{raw}'"
                ))
            })?,
        };

        Ok(Self {
            uri: var("URI"),
            keep_alive: flag("KEEP_ALIVE", defaults.keep_alive)?,
            max_idle_ms,
            tls: TlsSettings {
                enabled: flag("TLS", false)?,
                allow_invalid_hostnames: flag("TLS_ALLOW_INVALID_HOSTNAMES", false)?,
                allow_invalid_certificates: flag("TLS_ALLOW_INVALID_CERTIFICATES", false)?,
            },
        })
    }

    /// TLS settings to apply, or `None` when TLS is disabled.
    #[must_use]
    pub fn effective_tls(&self) -> Option<TlsSettings> {
        self.tls.enabled.then_some(self.tls)
    }

    /// Parse the URI into its components.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URI is missing or malformed.
    pub fn parse_uri(&self) -> MongoResult<ParsedUri> {
        let uri = self
            .uri
            .as_deref()
            .ok_or_else(|| MongoIOError::configuration("uri is required"))?;
        let caps = URI_PATTERN.captures(uri.trim()).ok_or_else(|| {
            MongoIOError::configuration(
                "uri must look like mongodb://[user[:password]@]host[:port][,host[:port]][/db][?options]",
            )
            .with_source(redact(uri))
        })?;

        let hosts: Vec<String> = caps["hosts"].split(',').map(str::to_string).collect();
        for host in &hosts {
            validate_host(host).map_err(|e| e.with_source(redact(uri)))?;
        }
        let srv = &caps["scheme"] == "mongodb+srv";
        if srv && hosts.len() != 1 {
            return Err(MongoIOError::configuration(
                "mongodb+srv uri must name exactly one host",
            ));
        }

        Ok(ParsedUri {
            srv,
            username: caps.name("user").map(|m| m.as_str().to_string()),
            has_password: caps.name("password").is_some(),
            hosts,
            auth_database: caps
                .name("database")
                .map(|m| m.as_str())
                .filter(|db| !db.is_empty())
                .map(str::to_string),
            options: caps
                .name("options")
                .map(|m| m.as_str())
                .filter(|o| !o.is_empty())
                .map(str::to_string),
        })
    }

    /// The URI with any password replaced by `*****`.
    #[must_use]
    pub fn redacted_uri(&self) -> String {
        self.uri.as_deref().map(redact).unwrap_or_default()
    }

    fn problems(&self, out: &mut Vec<String>) {
        if let Err(e) = self.parse_uri() {
            out.push(e.message);
        }
    }

    fn display_into(&self, out: &mut Vec<(&'static str, String)>) {
        out.push(("uri", self.redacted_uri()));
        out.push(("keepAlive", self.keep_alive.to_string()));
        out.push(("maxConnectionIdleTime", self.max_idle_ms.to_string()));
        out.push(("sslEnabled", self.tls.enabled.to_string()));
        out.push((
            "sslInvalidHostNameAllowed",
            self.tls.allow_invalid_hostnames.to_string(),
        ));
        out.push((
            "ignoreSSLCertificate",
            self.tls.allow_invalid_certificates.to_string(),
        ));
    }
}

fn validate_host(host: &str) -> MongoResult<()> {
    if host.is_empty() {
        return Err(MongoIOError::configuration("uri contains an empty host"));
    }
    let port = if let Some(rest) = host.strip_prefix('[') {
        // [ipv6]:port
        let (_, after) = rest.split_once(']').ok_or_else(|| {
            MongoIOError::configuration(format!("unterminated IPv6 host '{host}'"))
        })?;
        after.strip_prefix(':')
    } else {
        host.split_once(':').map(|(_, port)| port)
    };
    if let Some(port) = port
        && port.parse::<u16>().is_err()
    {
        return Err(MongoIOError::configuration(format!(
            "invalid port in host '{host}'"
        )));
    }
    Ok(())
}

fn redact(uri: &str) -> String {
    match URI_PATTERN.captures(uri.trim()) {
        Some(caps) => match caps.name("password") {
            Some(password) => {
                let mut out = uri.trim().to_string();
                out.replace_range(password.range(), "*****");
                out
            }
            None => uri.trim().to_string(),
        },
        None => "<invalid uri>".to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn database_problems(database: Option<&str>, out: &mut Vec<String>) {
    match database {
        None => out.push("database is required".into()),
        Some("") => out.push("database can not be empty".into()),
        Some(db) => {
            if let Some(c) = db.chars().find(|c| "/\\. \"$\0".contains(*c)) {
                out.push(format!("database name '{db}' contains invalid character {c:?}"));
            }
        }
    }
}

fn collection_problems(collection: Option<&str>, out: &mut Vec<String>) {
    match collection {
        None => out.push("collection is required".into()),
        Some("") => out.push("collection can not be empty".into()),
        Some(coll) => {
            if coll.contains('$') || coll.contains('\0') {
                out.push(format!("collection name '{coll}' contains '$' or NUL"));
            }
            if coll.starts_with("system.") {
                out.push(format!("collection name '{coll}' is reserved"));
            }
        }
    }
}

fn into_result(problems: Vec<String>) -> MongoResult<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(MongoIOError::configuration(problems.join("; ")))
    }
}

macro_rules! connection_setters {
    ($ty:ty) => {
        impl $ty {
            /// Sets the connection URI.
            #[must_use]
            pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
                self.connection.uri = Some(uri.into());
                self
            }

            /// Sets whether socket keep-alive is enabled.
            #[must_use]
            pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
                self.connection.keep_alive = keep_alive;
                self
            }

            /// Sets the maximum idle time for a pooled connection, in milliseconds.
            #[must_use]
            pub fn with_max_connection_idle_time(mut self, millis: u64) -> Self {
                self.connection.max_idle_ms = millis;
                self
            }

            #[must_use]
            pub fn with_tls_enabled(mut self, enabled: bool) -> Self {
                self.connection.tls.enabled = enabled;
                self
            }

            #[must_use]
            pub fn with_tls_invalid_hostname_allowed(mut self, allowed: bool) -> Self {
                self.connection.tls.allow_invalid_hostnames = allowed;
                self
            }

            /// Accept self-signed or otherwise unverifiable certificates.
            #[must_use]
            pub fn with_ignore_tls_certificate(mut self, ignore: bool) -> Self {
                self.connection.tls.allow_invalid_certificates = ignore;
                self
            }

            /// Sets the database to use.
            #[must_use]
            pub fn with_database(mut self, database: impl Into<String>) -> Self {
                self.database = Some(database.into());
                self
            }

            /// Sets the collection to use.
            #[must_use]
            pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
                self.collection = Some(collection.into());
                self
            }

            pub(crate) fn database_name(&self) -> &str {
                self.database.as_deref().unwrap_or_default()
            }

            pub(crate) fn collection_name(&self) -> &str {
                self.collection.as_deref().unwrap_or_default()
            }
        }
    };
}

// ============================================================================
// Read
// ============================================================================

/// What to read and how to partition it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadSpec {
    pub connection: ConnectionConfig,
    pub database: Option<String>,
    pub collection: Option<String>,
    /// Extended JSON query document.
    pub filter: Option<String>,
    /// Fields to include; `_id` is always returned.
    pub projection: Option<Vec<String>>,
    /// Desired number of partitions, `0` lets the runner decide.
    pub num_splits: u32,
}

connection_setters!(ReadSpec);

impl ReadSpec {
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection: ConnectionConfig::new(uri),
            database: Some(database.into()),
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the JSON does not match the schema or fails
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> MongoResult<Self> {
        let spec: Self = serde_json::from_str(json).map_err(|e| {
            MongoIOError::configuration(format!("invalid read specification: {e}"))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Sets a filter on the documents in the collection.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restrict returned documents to the given fields (plus `_id`).
    #[must_use]
    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the desired number of partitions.
    #[must_use]
    pub fn with_num_splits(mut self, num_splits: u32) -> Self {
        self.num_splits = num_splits;
        self
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a configuration error listing each invalid field.
    pub fn validate(&self) -> MongoResult<()> {
        let mut problems = Vec::new();
        self.connection.problems(&mut problems);
        database_problems(self.database.as_deref(), &mut problems);
        collection_problems(self.collection.as_deref(), &mut problems);

        if let Some(filter) = &self.filter {
            if filter.trim().is_empty() {
                problems.push("filter can not be empty".into());
            } else if let Err(e) = parse_filter(filter) {
                problems.push(e.message);
            }
        }
        if let Some(projection) = &self.projection {
            if projection.is_empty() {
                problems.push("projection can not be empty".into());
            }
            if projection.iter().any(|f| f.trim().is_empty()) {
                problems.push("projection field names can not be empty".into());
            }
        }
        into_result(problems)
    }

    /// Configuration as ordered key/value pairs for pipeline descriptions.
    #[must_use]
    pub fn display_data(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        self.connection.display_into(&mut out);
        out.push(("database", self.database_name().to_string()));
        out.push(("collection", self.collection_name().to_string()));
        if let Some(filter) = &self.filter {
            out.push(("filter", filter.clone()));
        }
        if let Some(projection) = &self.projection {
            out.push(("projection", format!("[{}]", projection.join(", "))));
        }
        out.push(("numSplit", self.num_splits.to_string()));
        out
    }
}

// ============================================================================
// Write
// ============================================================================

/// Where to write and how to batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteSpec {
    pub connection: ConnectionConfig,
    pub database: Option<String>,
    pub collection: Option<String>,
    /// Documents per bulk insert; `0` inserts every document on its own.
    pub batch_size: u64,
    /// Ordered bulk writes stop at the first failure and report it.
    pub ordered: bool,
}

impl Default for WriteSpec {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            database: None,
            collection: None,
            batch_size: DEFAULT_BATCH_SIZE,
            ordered: true,
        }
    }
}

connection_setters!(WriteSpec);

impl WriteSpec {
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection: ConnectionConfig::new(uri),
            database: Some(database.into()),
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the JSON does not match the schema or fails
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> MongoResult<Self> {
        let spec: Self = serde_json::from_str(json).map_err(|e| {
            MongoIOError::configuration(format!("invalid write specification: {e}"))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Define the size of the batch to group write operations.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables ordered bulk insertion (default: true).
    #[must_use]
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// # Errors
    ///
    /// Returns a configuration error listing each invalid field.
    pub fn validate(&self) -> MongoResult<()> {
        let mut problems = Vec::new();
        self.connection.problems(&mut problems);
        database_problems(self.database.as_deref(), &mut problems);
        collection_problems(self.collection.as_deref(), &mut problems);
        into_result(problems)
    }

    #[must_use]
    pub fn display_data(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        self.connection.display_into(&mut out);
        out.push(("ordered", self.ordered.to_string()));
        out.push(("database", self.database_name().to_string()));
        out.push(("collection", self.collection_name().to_string()));
        out.push(("batchSize", self.batch_size.to_string()));
        out
    }
}
