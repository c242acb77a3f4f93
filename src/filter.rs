//! Range filter compilation.
//!
//! The split-advisory command returns an ordered list of `{_id: key}` documents. This module
//! turns that list into query filters, one per partition, such that every possible `_id` is
//! matched by exactly one filter:
//!
//! ```text
//! keys:     k0        k1        k2
//! ranges: (-inf, k0] (k0, k1] (k1, k2] (k2, +inf)
//! ```
//!
//! Filters are MongoDB Extended JSON strings. Keys are rendered in relaxed form, so `ObjectId`s
//! become `{"$oid": "..."}` and numbers stay numbers. A user filter, when present, is kept
//! verbatim as a further conjunct of the `$and`:
//!
//! ```
//! use bson::doc;
//! use ironbeam_mongodb::filter::split_keys_to_filters;
//!
//! let keys = vec![doc! { "_id": 10 }, doc! { "_id": 20 }];
//! let filters = split_keys_to_filters(&keys, Some(r#"{"kind":"a"}"#)).unwrap();
//! assert_eq!(filters.len(), 3);
//! assert_eq!(filters[0], r#"{"$and":[{"_id":{"$lte":10}},{"kind":"a"}]}"#);
//! assert_eq!(filters[1], r#"{"$and":[{"_id":{"$gt":10,"$lte":20}},{"kind":"a"}]}"#);
//! assert_eq!(filters[2], r#"{"$and":[{"_id":{"$gt":20}},{"kind":"a"}]}"#);
//! ```

use crate::error::{MongoIOError, MongoResult};
use bson::{Bson, Document};
use serde_json::{Map, Value};

/// Field used as the split key and range bound.
pub const ID_FIELD: &str = "_id";

/// Compile split keys into `split_keys.len() + 1` contiguous, disjoint range filters.
///
/// `additional_filter` is ignored when `None` or blank.
///
/// # Errors
///
/// Returns a [`crate::ErrorKind::Command`] error if a split document has no `_id`, and a
/// [`crate::ErrorKind::Configuration`] error if `additional_filter` is not a JSON object.
pub fn split_keys_to_filters(
    split_keys: &[Document],
    additional_filter: Option<&str>,
) -> MongoResult<Vec<String>> {
    let additional = additional_conjunct(additional_filter)?;

    let bounds = split_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            key.get(ID_FIELD).cloned().ok_or_else(|| {
                MongoIOError::new(
                    crate::ErrorKind::Command,
                    format!("split key #{i} has no {ID_FIELD} field"),
                )
                .with_source(key.to_string())
            })
        })
        .collect::<MongoResult<Vec<Bson>>>()?;

    let mut filters = Vec::with_capacity(bounds.len() + 1);
    let mut lower: Option<&Bson> = None;
    for upper in &bounds {
        filters.push(compose(lower, Some(upper), additional)?);
        lower = Some(upper);
    }
    // open-ended tail (or the whole key space when there were no keys)
    filters.push(compose(lower, None, additional)?);
    Ok(filters)
}

/// Build a single filter matching `lower < _id <= upper`, either bound optional.
///
/// # Errors
///
/// Returns a [`crate::ErrorKind::Configuration`] error if `additional_filter` is not a JSON
/// object.
pub fn range_filter(
    lower: Option<&Bson>,
    upper: Option<&Bson>,
    additional_filter: Option<&str>,
) -> MongoResult<String> {
    let additional = additional_conjunct(additional_filter)?;
    compose(lower, upper, additional)
}

/// Parse a filter string into a query document.
///
/// Accepts MongoDB Extended JSON (canonical or relaxed), so `{"_id": {"$oid": "..."}}`
/// yields an `ObjectId` value.
///
/// # Errors
///
/// Returns a [`crate::ErrorKind::Configuration`] error if the text is not JSON, is not an
/// object, or contains malformed Extended JSON.
pub fn parse_filter(filter: &str) -> MongoResult<Document> {
    let value: Value = serde_json::from_str(filter).map_err(|e| {
        MongoIOError::configuration(format!("filter is not valid JSON: {e}"))
            .with_source(filter.to_string())
    })?;
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(MongoIOError::configuration(format!(
            "filter must be a JSON object, got {other}"
        ))),
        Err(e) => Err(MongoIOError::configuration(format!(
            "filter is not valid Extended JSON: {e}"
        ))
        .with_source(filter.to_string())),
    }
}

fn additional_conjunct(additional_filter: Option<&str>) -> MongoResult<Option<&str>> {
    match additional_filter.map(str::trim) {
        Some(text) if !text.is_empty() => {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(_)) => Ok(Some(text)),
                Ok(_) => Err(MongoIOError::configuration(
                    "additional filter must be a JSON object",
                )),
                Err(e) => Err(MongoIOError::configuration(format!(
                    "additional filter is not valid JSON: {e}"
                ))
                .with_source(text.to_string())),
            }
        }
        _ => Ok(None),
    }
}

fn compose(
    lower: Option<&Bson>,
    upper: Option<&Bson>,
    additional: Option<&str>,
) -> MongoResult<String> {
    let mut clauses: Vec<String> = Vec::with_capacity(2);

    if lower.is_some() || upper.is_some() {
        let mut range = Map::new();
        if let Some(lower) = lower {
            range.insert("$gt".into(), lower.clone().into_relaxed_extjson());
        }
        if let Some(upper) = upper {
            range.insert("$lte".into(), upper.clone().into_relaxed_extjson());
        }
        let mut clause = Map::new();
        clause.insert(ID_FIELD.into(), Value::Object(range));
        let rendered = serde_json::to_string(&Value::Object(clause)).map_err(|e| {
            MongoIOError::new(crate::ErrorKind::Command, format!("render range bound: {e}"))
        })?;
        clauses.push(rendered);
    }
    if let Some(additional) = additional {
        clauses.push(additional.to_string());
    }

    if clauses.is_empty() {
        return Ok("{}".to_string());
    }
    Ok(format!("{{\"$and\":[{}]}}", clauses.join(",")))
}
