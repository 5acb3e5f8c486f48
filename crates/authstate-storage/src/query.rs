//! Query matching, projection and update application over [`Document`]s.
//!
//! Supported query forms:
//! - `{field: value}` and dotted paths (`{"roles.role": "read"}`); an array field matches
//!   when any element equals the value
//! - `{field: {$eq | $ne | $in | $nin | $exists: ...}}`
//! - `{$and: [...]}`, `{$or: [...]}`
//!
//! Updates are either a replacement document (no `$` keys, `_id` preserved) or an
//! operator document using `$set`, `$unset`, `$inc`, `$push`, `$pull`, `$addToSet`.

use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};
use crate::traits::Document;

/// Returns true when `document` satisfies `query`.
pub fn matches(document: &Document, query: &Document) -> StorageResult<bool> {
    for (key, condition) in query {
        let satisfied = match key.as_str() {
            "$and" => all_clauses(document, condition, true)?,
            "$or" => all_clauses(document, condition, false)?,
            op if op.starts_with('$') => {
                return Err(StorageError::InvalidQuery {
                    message: format!("unknown top-level operator {op}"),
                })
            }
            path => field_matches(&lookup(document, path), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_clauses(document: &Document, clauses: &Value, conjunction: bool) -> StorageResult<bool> {
    let clauses = clauses.as_array().ok_or_else(|| StorageError::InvalidQuery {
        message: "$and/$or expects an array".to_string(),
    })?;
    for clause in clauses {
        let clause = clause.as_object().ok_or_else(|| StorageError::InvalidQuery {
            message: "$and/$or clauses must be documents".to_string(),
        })?;
        let hit = matches(document, clause)?;
        if conjunction && !hit {
            return Ok(false);
        }
        if !conjunction && hit {
            return Ok(true);
        }
    }
    Ok(conjunction)
}

fn is_operator_document(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|map| map.keys().next())
        .is_some_and(|key| key.starts_with('$'))
}

fn field_matches(candidates: &[&Value], condition: &Value) -> StorageResult<bool> {
    if !is_operator_document(condition) {
        return Ok(candidates.iter().any(|value| value_matches(value, condition)));
    }

    let operators = condition.as_object().map(Map::iter).into_iter().flatten();
    for (op, operand) in operators {
        let satisfied = match op.as_str() {
            "$eq" => candidates.iter().any(|value| value_matches(value, operand)),
            "$ne" => !candidates.iter().any(|value| value_matches(value, operand)),
            "$in" => {
                let options = operand_array(op, operand)?;
                candidates
                    .iter()
                    .any(|value| options.iter().any(|option| value_matches(value, option)))
            }
            "$nin" => {
                let options = operand_array(op, operand)?;
                !candidates
                    .iter()
                    .any(|value| options.iter().any(|option| value_matches(value, option)))
            }
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| StorageError::InvalidQuery {
                    message: "$exists expects a boolean".to_string(),
                })?;
                candidates.is_empty() != wanted
            }
            other => {
                return Err(StorageError::InvalidQuery {
                    message: format!("unknown operator {other}"),
                })
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn operand_array<'a>(op: &str, operand: &'a Value) -> StorageResult<&'a Vec<Value>> {
    operand.as_array().ok_or_else(|| StorageError::InvalidQuery {
        message: format!("{op} expects an array"),
    })
}

/// Equality where an array value also matches any of its elements.
fn value_matches(value: &Value, expected: &Value) -> bool {
    if values_equal(value, expected) {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

/// Structural equality that treats `1` and `1.0` as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => a == b,
    }
}

/// Resolves a dotted path, descending into arrays of sub-documents.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = Vec::new();
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return current;
    };
    if let Some(value) = document.get(first) {
        current.push(value);
    }

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Object(map) = item {
                            next.extend(map.get(segment));
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Applies `projection` to a matched document.
///
/// Inclusion projections keep `_id` unless it is explicitly excluded.
pub fn project(document: Document, projection: &Document) -> StorageResult<Document> {
    if projection.is_empty() {
        return Ok(document);
    }
    let mut include = None;
    for (field, flag) in projection {
        let on = flag_value(flag)?;
        if field == "_id" {
            continue;
        }
        match include {
            None => include = Some(on),
            Some(mode) if mode != on => {
                return Err(StorageError::InvalidQuery {
                    message: "projection cannot mix inclusion and exclusion".to_string(),
                })
            }
            Some(_) => {}
        }
    }
    let keep_id = match projection.get("_id") {
        Some(flag) => flag_value(flag)?,
        None => true,
    };

    let projected = match include {
        Some(true) => {
            let mut out = Map::new();
            for (field, value) in &document {
                if projection.contains_key(field) && field != "_id" {
                    out.insert(field.clone(), value.clone());
                }
            }
            if keep_id {
                if let Some(id) = document.get("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
            out
        }
        _ => {
            let mut out = document;
            for (field, flag) in projection {
                if field != "_id" && !flag_value(flag)? {
                    out.remove(field);
                }
            }
            if !keep_id {
                out.remove("_id");
            }
            out
        }
    };
    Ok(projected)
}

fn flag_value(flag: &Value) -> StorageResult<bool> {
    match flag {
        Value::Bool(on) => Ok(*on),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        _ => Err(StorageError::InvalidQuery {
            message: format!("invalid projection flag {flag}"),
        }),
    }
}

/// Builds the initial document for an upsert from the query's equality fields.
pub fn upsert_seed(query: &Document) -> StorageResult<Document> {
    let mut seed = Map::new();
    for (key, condition) in query {
        if key.starts_with('$') {
            continue;
        }
        let value = match condition {
            condition if !is_operator_document(condition) => condition.clone(),
            Value::Object(ops) => match ops.get("$eq") {
                Some(value) => value.clone(),
                None => continue,
            },
            _ => continue,
        };
        set_path(&mut seed, key, value)?;
    }
    Ok(seed)
}

/// Applies an update document in place.
pub fn apply_update(document: &mut Document, update: &Document) -> StorageResult<()> {
    let operator_keys = update.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        return replace(document, update);
    }
    if operator_keys != update.len() {
        return Err(StorageError::InvalidUpdate {
            message: "cannot mix update operators and replacement fields".to_string(),
        });
    }

    for (op, fields) in update {
        let fields = fields.as_object().ok_or_else(|| StorageError::InvalidUpdate {
            message: format!("{op} expects a document"),
        })?;
        for (path, operand) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(StorageError::InvalidUpdate {
                    message: "the _id field cannot be modified".to_string(),
                });
            }
            match op.as_str() {
                "$set" => set_path(document, path, operand.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => increment(document, path, operand)?,
                "$push" => array_at(document, path)?.push(operand.clone()),
                "$addToSet" => {
                    let items = array_at(document, path)?;
                    if !items.iter().any(|item| values_equal(item, operand)) {
                        items.push(operand.clone());
                    }
                }
                "$pull" => {
                    if let Some(Value::Array(items)) = get_path_mut(document, path) {
                        let mut kept = Vec::with_capacity(items.len());
                        for item in items.drain(..) {
                            if !pull_matches(&item, operand)? {
                                kept.push(item);
                            }
                        }
                        *items = kept;
                    }
                }
                other => {
                    return Err(StorageError::InvalidUpdate {
                        message: format!("unknown update operator {other}"),
                    })
                }
            }
        }
    }
    Ok(())
}

fn replace(document: &mut Document, replacement: &Document) -> StorageResult<()> {
    let id = document.get("_id").cloned();
    if let (Some(existing), Some(new)) = (&id, replacement.get("_id")) {
        if !values_equal(existing, new) {
            return Err(StorageError::InvalidUpdate {
                message: "the _id field cannot be modified".to_string(),
            });
        }
    }
    *document = replacement.clone();
    if let Some(id) = id {
        document.insert("_id".to_string(), id);
    }
    Ok(())
}

fn pull_matches(item: &Value, operand: &Value) -> StorageResult<bool> {
    match (item, operand) {
        (Value::Object(element), Value::Object(criteria)) if !is_operator_document(operand) => {
            matches(element, criteria)
        }
        _ => Ok(values_equal(item, operand)),
    }
}

fn increment(document: &mut Document, path: &str, by: &Value) -> StorageResult<()> {
    let by = by.as_f64().ok_or_else(|| StorageError::InvalidUpdate {
        message: format!("$inc of {path} expects a number"),
    })?;
    let current = match get_path_mut(document, path) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Null) | None => 0.0,
        Some(_) => {
            return Err(StorageError::InvalidUpdate {
                message: format!("cannot $inc non-numeric field {path}"),
            })
        }
    };
    let sum = current + by;
    let value = if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Value::from(sum as i64)
    } else {
        Value::from(sum)
    };
    set_path(document, path, value)
}

fn array_at<'a>(document: &'a mut Document, path: &str) -> StorageResult<&'a mut Vec<Value>> {
    if get_path_mut(document, path).is_none() {
        set_path(document, path, Value::Array(Vec::new()))?;
    }
    match get_path_mut(document, path) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(StorageError::InvalidUpdate {
            message: format!("field {path} is not an array"),
        }),
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// Sets a dotted path, creating intermediate sub-documents.
pub fn set_path(document: &mut Document, path: &str, value: Value) -> StorageResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut current = document;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| StorageError::InvalidUpdate {
            message: format!("cannot create field {path}: {segment} is not a document"),
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn unset_path(document: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            document.remove(path);
        }
        Some((parent, last)) => {
            if let Some(Value::Object(map)) = get_path_mut(document, parent) {
                map.remove(last);
            }
        }
    }
}
