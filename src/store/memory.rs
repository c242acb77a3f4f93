//! In-memory store.
//!
//! [`InMemoryMongo`] implements the connector traits over plain vectors of documents, so
//! sources, readers and writers can be exercised without a server. Besides data it keeps a
//! record of what happened (connections opened and closed, commands run, bulk-insert
//! batches) and can be told to fail specific operations.
//!
//! ```
//! use bson::doc;
//! use ironbeam_mongodb::store::{InMemoryMongo, MongoConnection, MongoConnector};
//! use ironbeam_mongodb::ConnectionConfig;
//!
//! let store = InMemoryMongo::new();
//! store.insert_documents("db", "people", vec![doc! { "_id": 1, "name": "Ada" }]);
//!
//! let mut conn = store.connect(&ConnectionConfig::new("mongodb://localhost")).unwrap();
//! let stats = conn.run_command("db", doc! { "collStats": "people" }).unwrap();
//! assert!(stats.get_i64("size").unwrap() > 0);
//! conn.close().unwrap();
//! assert_eq!(store.stats().connections_closed, 1);
//! ```

use crate::config::ConnectionConfig;
use crate::error::{BulkWriteFailure, ErrorKind, MongoIOError, MongoResult, WriteFailure};
use crate::filter::ID_FIELD;
use crate::store::traits::{
    FindRequest, InsertManyResult, MongoConnection, MongoConnector, MongoCursor,
};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const MIB: u64 = 1024 * 1024;
const DUPLICATE_KEY: i32 = 11000;

type Namespace = (String, String);

/// Counters of resource usage, for lifecycle assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub cursors_opened: usize,
    pub cursors_closed: usize,
    pub commands_run: usize,
}

/// One recorded `insert_many` request.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCall {
    pub database: String,
    pub collection: String,
    pub ordered: bool,
    pub documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct Failures {
    connect: bool,
    commands: bool,
    find: bool,
    cursor_after: Option<usize>,
    cursor_close: bool,
    connection_close: bool,
    insert_many: Option<ErrorKind>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<Namespace, Vec<Document>>,
    split_keys: HashMap<Namespace, Vec<Document>>,
    failures: Failures,
    stats: StoreStats,
    inserts: Vec<InsertCall>,
    commands: Vec<Document>,
    configs: Vec<ConnectionConfig>,
}

type SharedState = Arc<Mutex<StoreState>>;

/// In-memory implementation of [`MongoConnector`].
///
/// Cloning shares the underlying data.
#[derive(Clone, Default)]
pub struct InMemoryMongo {
    state: SharedState,
}

impl InMemoryMongo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Seed a collection. Documents without `_id` get an `ObjectId`.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn insert_documents(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut state = self.lock();
        let coll = state
            .collections
            .entry(namespace(database, collection))
            .or_default();
        coll.extend(documents.into_iter().map(with_id));
    }

    /// Snapshot of a collection in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(&namespace(database, collection))
            .cloned()
            .unwrap_or_default()
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn count(&self, database: &str, collection: &str) -> usize {
        self.lock()
            .collections
            .get(&namespace(database, collection))
            .map_or(0, Vec::len)
    }

    /// Make `splitVector` return exactly these keys for the collection, regardless of size.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn set_split_keys(&self, database: &str, collection: &str, keys: Vec<Document>) {
        self.lock()
            .split_keys
            .insert(namespace(database, collection), keys);
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Every `insert_many` request received, including rejected ones.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn insert_calls(&self) -> Vec<InsertCall> {
        self.lock().inserts.clone()
    }

    /// Every admin command received.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn commands(&self) -> Vec<Document> {
        self.lock().commands.clone()
    }

    /// Configuration of every connection attempt.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn connection_configs(&self) -> Vec<ConnectionConfig> {
        self.lock().configs.clone()
    }

    // ------------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------------

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().failures.connect = fail;
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_commands(&self, fail: bool) {
        self.lock().failures.commands = fail;
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_find(&self, fail: bool) {
        self.lock().failures.find = fail;
    }

    /// Cursors fail after yielding `n` documents.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_cursor_after(&self, n: Option<usize>) {
        self.lock().failures.cursor_after = n;
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_cursor_close(&self, fail: bool) {
        self.lock().failures.cursor_close = fail;
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_connection_close(&self, fail: bool) {
        self.lock().failures.connection_close = fail;
    }

    /// Reject every `insert_many` request with an error of `kind` before touching data.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_insert_many(&self, kind: Option<ErrorKind>) {
        self.lock().failures.insert_many = kind;
    }
}

impl MongoConnector for InMemoryMongo {
    fn connect(&self, config: &ConnectionConfig) -> MongoResult<Box<dyn MongoConnection>> {
        let mut state = self.lock();
        state.configs.push(config.clone());
        if state.failures.connect {
            return Err(MongoIOError::new(
                ErrorKind::Connectivity,
                "connection refused",
            ));
        }
        config
            .parse_uri()
            .map_err(|e| MongoIOError::new(ErrorKind::Connectivity, e.message))?;
        state.stats.connections_opened += 1;
        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

// ============================================================================
// Connection
// ============================================================================

struct InMemoryConnection {
    state: SharedState,
    closed: bool,
}

impl InMemoryConnection {
    fn open_state(&self) -> MongoResult<MutexGuard<'_, StoreState>> {
        if self.closed {
            return Err(MongoIOError::new(
                ErrorKind::Connectivity,
                "connection already closed",
            ));
        }
        Ok(lock(&self.state))
    }
}

impl MongoConnection for InMemoryConnection {
    fn run_command(&mut self, database: &str, command: Document) -> MongoResult<Document> {
        let mut state = self.open_state()?;
        state.stats.commands_run += 1;
        state.commands.push(command.clone());
        if state.failures.commands {
            return Err(MongoIOError::new(ErrorKind::Command, "command failed"));
        }

        let name = command
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| MongoIOError::new(ErrorKind::Command, "empty command"))?;
        match name.as_str() {
            "collStats" => coll_stats(&state, database, &command),
            "splitVector" => split_vector(&state, &command),
            other => Err(MongoIOError::new(
                ErrorKind::Command,
                format!("no such command: '{other}'"),
            )),
        }
    }

    fn find(
        &mut self,
        database: &str,
        collection: &str,
        request: FindRequest,
    ) -> MongoResult<Box<dyn MongoCursor>> {
        let mut state = self.open_state()?;
        if state.failures.find {
            return Err(MongoIOError::new(ErrorKind::Query, "find failed"));
        }

        let mut matched = VecDeque::new();
        if let Some(docs) = state.collections.get(&namespace(database, collection)) {
            for doc in docs {
                let keep = match &request.filter {
                    Some(filter) => matches(doc, filter)?,
                    None => true,
                };
                if keep {
                    matched.push_back(match &request.projection {
                        Some(projection) => project(doc, projection),
                        None => doc.clone(),
                    });
                }
            }
        }

        state.stats.cursors_opened += 1;
        let fail_after = state.failures.cursor_after;
        drop(state);
        Ok(Box::new(InMemoryCursor {
            state: Arc::clone(&self.state),
            remaining: matched,
            yielded: 0,
            fail_after,
            closed: false,
        }))
    }

    fn insert_many(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> MongoResult<InsertManyResult> {
        let mut state = self.open_state()?;
        state.inserts.push(InsertCall {
            database: database.to_string(),
            collection: collection.to_string(),
            ordered,
            documents: documents.clone(),
        });
        if let Some(kind) = state.failures.insert_many {
            return Err(MongoIOError::new(kind, "insert_many failed"));
        }

        let coll = state
            .collections
            .entry(namespace(database, collection))
            .or_default();
        let mut inserted_ids = Vec::with_capacity(documents.len());
        let mut write_errors = Vec::new();
        for (index, doc) in documents.into_iter().map(with_id).enumerate() {
            let id = doc.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
            if coll.iter().any(|existing| existing.get(ID_FIELD) == Some(&id)) {
                write_errors.push(WriteFailure {
                    index,
                    code: DUPLICATE_KEY,
                    message: format!("E11000 duplicate key error dup key: {{ _id: {id} }}"),
                });
                if ordered {
                    break;
                }
                continue;
            }
            coll.push(doc);
            inserted_ids.push(id);
        }

        if write_errors.is_empty() {
            Ok(InsertManyResult { inserted_ids })
        } else {
            Err(MongoIOError::bulk_write(BulkWriteFailure {
                inserted_count: inserted_ids.len(),
                write_errors,
            }))
        }
    }

    fn close(&mut self) -> MongoResult<()> {
        let mut state = lock(&self.state);
        state.stats.connections_closed += 1;
        if self.closed {
            return Err(MongoIOError::new(ErrorKind::Close, "connection closed twice"));
        }
        self.closed = true;
        if state.failures.connection_close {
            return Err(MongoIOError::new(ErrorKind::Close, "connection close failed"));
        }
        Ok(())
    }
}

// ============================================================================
// Cursor
// ============================================================================

struct InMemoryCursor {
    state: SharedState,
    remaining: VecDeque<Document>,
    yielded: usize,
    fail_after: Option<usize>,
    closed: bool,
}

impl MongoCursor for InMemoryCursor {
    fn try_next(&mut self) -> MongoResult<Option<Document>> {
        if self.closed {
            return Err(MongoIOError::new(ErrorKind::Query, "cursor already closed"));
        }
        if self.fail_after.is_some_and(|n| self.yielded >= n) {
            return Err(MongoIOError::new(ErrorKind::Query, "cursor fetch failed"));
        }
        let next = self.remaining.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    fn close(&mut self) -> MongoResult<()> {
        let mut state = lock(&self.state);
        state.stats.cursors_closed += 1;
        self.closed = true;
        if state.failures.cursor_close {
            return Err(MongoIOError::new(ErrorKind::Close, "cursor close failed"));
        }
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

fn coll_stats(state: &StoreState, database: &str, command: &Document) -> MongoResult<Document> {
    let collection = command.get_str("collStats").map_err(|e| {
        MongoIOError::new(ErrorKind::Command, format!("collStats: {e}"))
    })?;
    let docs = state.collections.get(&namespace(database, collection));
    let count = docs.map_or(0, Vec::len);
    let size: u64 = docs.map_or(0, |docs| docs.iter().map(document_size).sum());
    let mut reply = Document::new();
    reply.insert("ns", format!("{database}.{collection}"));
    reply.insert("count", i64::try_from(count).unwrap_or(i64::MAX));
    reply.insert("size", i64::try_from(size).unwrap_or(i64::MAX));
    reply.insert("ok", 1.0);
    Ok(reply)
}

fn split_vector(state: &StoreState, command: &Document) -> MongoResult<Document> {
    let ns = command.get_str("splitVector").map_err(|e| {
        MongoIOError::new(ErrorKind::Command, format!("splitVector: {e}"))
    })?;
    let (database, collection) = ns.split_once('.').ok_or_else(|| {
        MongoIOError::new(ErrorKind::Command, format!("invalid namespace '{ns}'"))
    })?;
    let max_chunk_mb = match command.get("maxChunkSize") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        _ => {
            return Err(MongoIOError::new(
                ErrorKind::Command,
                "splitVector requires an integer maxChunkSize",
            ));
        }
    };
    let max_chunk_bytes = u64::try_from(max_chunk_mb)
        .ok()
        .filter(|mb| *mb > 0)
        .map(|mb| mb * MIB)
        .ok_or_else(|| MongoIOError::new(ErrorKind::Command, "maxChunkSize must be positive"))?;

    let ns_key = namespace(database, collection);
    let keys = if let Some(scripted) = state.split_keys.get(&ns_key) {
        scripted.clone()
    } else {
        let mut docs: Vec<&Document> = state
            .collections
            .get(&ns_key)
            .map(|docs| docs.iter().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| total_cmp(id_of(a), id_of(b)));

        let mut keys = Vec::new();
        let mut chunk_bytes = 0;
        let last = docs.len().saturating_sub(1);
        for (i, doc) in docs.iter().enumerate() {
            chunk_bytes += document_size(doc);
            if chunk_bytes >= max_chunk_bytes && i < last {
                let mut key = Document::new();
                key.insert(ID_FIELD, id_of(doc).clone());
                keys.push(key);
                chunk_bytes = 0;
            }
        }
        keys
    };

    let mut reply = Document::new();
    reply.insert(
        "splitKeys",
        Bson::Array(keys.into_iter().map(Bson::Document).collect()),
    );
    reply.insert("ok", 1.0);
    Ok(reply)
}

// ============================================================================
// Query evaluation
// ============================================================================

/// Evaluate a query document against `doc`.
fn matches(doc: &Document, filter: &Document) -> MongoResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => clauses(condition)?
                .iter()
                .try_fold(true, |acc, c| Ok::<_, MongoIOError>(acc && matches(doc, c)?))?,
            "$or" => clauses(condition)?
                .iter()
                .try_fold(false, |acc, c| Ok::<_, MongoIOError>(acc || matches(doc, c)?))?,
            "$nor" => !clauses(condition)?
                .iter()
                .try_fold(false, |acc, c| Ok::<_, MongoIOError>(acc || matches(doc, c)?))?,
            op if op.starts_with('$') => {
                return Err(MongoIOError::new(
                    ErrorKind::Query,
                    format!("unsupported top-level operator {op}"),
                ));
            }
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Bson) -> MongoResult<Vec<&Document>> {
    let Bson::Array(items) = condition else {
        return Err(MongoIOError::new(
            ErrorKind::Query,
            "$and/$or/$nor needs an array",
        ));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(MongoIOError::new(
                ErrorKind::Query,
                "$and/$or/$nor entries must be documents",
            )),
        })
        .collect()
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> MongoResult<bool> {
    let operators = match condition {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => d,
        other => return Ok(equals(value, other)),
    };
    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            "$in" => in_array(value, operand)?,
            "$nin" => !in_array(value, operand)?,
            "$exists" => value.is_some() == truthy(operand),
            other => {
                return Err(MongoIOError::new(
                    ErrorKind::Query,
                    format!("unsupported operator {other}"),
                ));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => items
            .iter()
            .any(|item| compare(item, expected) == Some(Ordering::Equal)),
        Some(v) => compare(v, expected) == Some(Ordering::Equal) || v == expected,
    }
}

fn compares(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare(v, operand))
        .is_some_and(accept)
}

fn in_array(value: Option<&Bson>, operand: &Bson) -> MongoResult<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(MongoIOError::new(ErrorKind::Query, "$in/$nin needs an array"));
    };
    Ok(candidates.iter().any(|c| equals(value, c)))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

fn project(doc: &Document, projection: &Document) -> Document {
    let mut out = Document::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD, id.clone());
    }
    for (field, value) in doc {
        if field != ID_FIELD && projection.contains_key(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

/// Compare two values of the same type bracket; `None` across brackets.
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Canonical cross-type order: null < numbers < strings < documents < arrays < binary <
/// object ids < booleans < dates < everything else.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

fn total_cmp(a: &Bson, b: &Bson) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare(a, b).unwrap_or(Ordering::Equal))
}

fn id_of(doc: &Document) -> &Bson {
    doc.get(ID_FIELD).unwrap_or(&Bson::Null)
}

// ============================================================================
// Utilities
// ============================================================================

fn lock(state: &SharedState) -> MutexGuard<'_, StoreState> {
    state.lock().expect("store state mutex poisoned")
}

fn namespace(database: &str, collection: &str) -> Namespace {
    (database.to_string(), collection.to_string())
}

fn with_id(doc: Document) -> Document {
    if doc.contains_key(ID_FIELD) {
        return doc;
    }
    let mut out = Document::new();
    out.insert(ID_FIELD, ObjectId::new());
    for (key, value) in doc {
        out.insert(key, value);
    }
    out
}

/// Encoded BSON size of a document.
#[must_use]
pub fn document_size(doc: &Document) -> u64 {
    let mut buf = Vec::new();
    match doc.to_writer(&mut buf) {
        Ok(()) => buf.len() as u64,
        Err(_) => 0,
    }
}
