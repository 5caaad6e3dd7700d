use crate::errors::StoreError;
use bson::{Bson, Document, doc};

use super::types::{CmpOp, Filter, MAX_FILTER_DEPTH, MAX_IN_SET, MAX_SORT_FIELDS, Order, SortSpec};

/// Parses store-native JSON text (extended JSON accepted) into a document.
fn parse_json_document(text: &str) -> Result<Document, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".into());
    }
    match Bson::try_from(value).map_err(|e| e.to_string())? {
        Bson::Document(d) => Ok(d),
        other => Err(format!("expected a document, found {:?}", other.element_type())),
    }
}

/// # Errors
/// Returns `MalformedFilter` if the text is not a JSON object or uses an unsupported operator.
pub fn parse_filter_json(text: &str) -> Result<Filter, StoreError> {
    let document = parse_json_document(text).map_err(StoreError::MalformedFilter)?;
    Filter::from_document(&document)
}

/// Parses filter text and checks only its shape, leaving operator support to the store.
///
/// # Errors
/// Returns `MalformedFilter` if the text is not a JSON object or is badly shaped; see
/// [`validate_filter_shape`].
pub fn parse_filter_shape(text: &str) -> Result<Document, StoreError> {
    let document = parse_json_document(text).map_err(StoreError::MalformedFilter)?;
    validate_filter_shape(&document)?;
    Ok(document)
}

/// Checks the parts of a filter every store agrees on: operator keys are `$` plus letters,
/// `$and`/`$or`/`$nor` take non-empty arrays of documents, field names are non-empty and an
/// operator document does not mix in plain fields. Which operators exist is for the store to say.
///
/// # Errors
/// Returns `MalformedFilter` naming the first offending key.
pub fn validate_filter_shape(document: &Document) -> Result<(), StoreError> {
    shape_at(document, 0)
}

fn is_operator_key(key: &str) -> bool {
    key.strip_prefix('$').is_some_and(|name| !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic()))
}

fn shape_at(document: &Document, depth: usize) -> Result<(), StoreError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(malformed("filter nested too deeply"));
    }
    for (key, value) in document {
        if key.starts_with('$') {
            if !is_operator_key(key) {
                return Err(malformed(format!("invalid operator '{key}'")));
            }
            if matches!(key.as_str(), "$and" | "$or" | "$nor") {
                let Bson::Array(items) = value else {
                    return Err(malformed(format!("{key} expects an array")));
                };
                if items.is_empty() {
                    return Err(malformed(format!("{key} expects a non-empty array")));
                }
                for item in items {
                    let Bson::Document(arm) = item else {
                        return Err(malformed(format!("{key} arms must be documents")));
                    };
                    shape_at(arm, depth + 1)?;
                }
            }
        } else if key.is_empty() {
            return Err(malformed("empty field name"));
        } else if let Bson::Document(inner) = value {
            operator_shape(key, inner, depth + 1)?;
        }
    }
    Ok(())
}

fn operator_shape(path: &str, value: &Document, depth: usize) -> Result<(), StoreError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(malformed("filter nested too deeply"));
    }
    let operators = value.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        // An embedded document compared for equality.
        return Ok(());
    }
    if operators != value.len() {
        return Err(malformed(format!("'{path}' mixes operators and fields")));
    }
    for (op, operand) in value {
        if !is_operator_key(op) {
            return Err(malformed(format!("invalid operator '{op}' on '{path}'")));
        }
        if let ("$not", Bson::Document(inner)) = (op.as_str(), operand) {
            operator_shape(path, inner, depth + 1)?;
        }
    }
    Ok(())
}

/// # Errors
/// Returns `MalformedSort` if the text is not an object of `field: 1 | -1` pairs.
pub fn parse_sort_json(text: &str) -> Result<Vec<SortSpec>, StoreError> {
    let document = parse_json_document(text).map_err(StoreError::MalformedSort)?;
    sort_from_document(&document)
}

/// # Errors
/// Returns `MalformedSort` for directions other than 1 / -1 or too many keys.
pub fn sort_from_document(document: &Document) -> Result<Vec<SortSpec>, StoreError> {
    if document.len() > MAX_SORT_FIELDS {
        return Err(StoreError::MalformedSort(format!(
            "at most {MAX_SORT_FIELDS} sort fields are supported"
        )));
    }
    let mut out = Vec::with_capacity(document.len());
    for (field, direction) in document {
        if field.is_empty() || field.starts_with('$') {
            return Err(StoreError::MalformedSort(format!("invalid sort field '{field}'")));
        }
        let order = match as_direction(direction) {
            Some(1) => Order::Asc,
            Some(-1) => Order::Desc,
            _ => {
                return Err(StoreError::MalformedSort(format!(
                    "sort direction for '{field}' must be 1 or -1"
                )));
            }
        };
        out.push(SortSpec { field: field.clone(), order });
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn as_direction(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.fract() == 0.0 => Some(*d as i64),
        _ => None,
    }
}

#[must_use]
pub fn sort_to_document(sort: &[SortSpec]) -> Document {
    let mut out = Document::new();
    for s in sort {
        let dir = if s.order == Order::Asc { 1 } else { -1 };
        out.insert(s.field.clone(), dir);
    }
    out
}

impl Filter {
    /// Validates a store-native filter document and converts it to the structured form.
    ///
    /// # Errors
    /// Returns `MalformedFilter` on unknown operators or badly shaped operands.
    pub fn from_document(document: &Document) -> Result<Self, StoreError> {
        from_document_at(document, 0)
    }

    /// Compiles the structured filter into a store-native filter document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        match self {
            Self::True => Document::new(),
            Self::And(fs) if fs.is_empty() => Document::new(),
            Self::And(fs) => doc! { "$and": docs(fs) },
            Self::Or(fs) => doc! { "$or": docs(fs) },
            Self::Nor(fs) => doc! { "$nor": docs(fs) },
            // Field-level $not only exists in the store language; a top-level negation is a one-arm $nor.
            Self::Not(f) => doc! { "$nor": [Bson::Document(f.to_document())] },
            Self::Exists { path, exists } => doc! { path.clone(): { "$exists": *exists } },
            Self::In { path, values } => doc! { path.clone(): { "$in": values.clone() } },
            Self::Nin { path, values } => doc! { path.clone(): { "$nin": values.clone() } },
            Self::Cmp { path, op, value } => {
                let mut inner = Document::new();
                inner.insert(op.operator(), value.clone());
                doc! { path.clone(): inner }
            }
            #[cfg(feature = "regex")]
            Self::Regex { path, pattern, case_insensitive } => {
                let options = if *case_insensitive { "i" } else { "" };
                doc! { path.clone(): { "$regex": pattern.clone(), "$options": options } }
            }
        }
    }
}

fn docs(fs: &[Filter]) -> Vec<Bson> {
    fs.iter().map(|f| Bson::Document(f.to_document())).collect()
}

fn malformed(msg: impl Into<String>) -> StoreError {
    StoreError::MalformedFilter(msg.into())
}

fn from_document_at(document: &Document, depth: usize) -> Result<Filter, StoreError> {
    if depth > MAX_FILTER_DEPTH {
        return Err(malformed("filter nested too deeply"));
    }
    let mut clauses = Vec::with_capacity(document.len());
    for (key, value) in document {
        let clause = if let Some(op) = key.strip_prefix('$') {
            let arms = logical_arms(key, value, depth)?;
            match op {
                "and" => Filter::And(arms),
                "or" => Filter::Or(arms),
                "nor" => Filter::Nor(arms),
                _ => return Err(malformed(format!("unknown top-level operator '{key}'"))),
            }
        } else if key.is_empty() {
            return Err(malformed("empty field name"));
        } else {
            field_clause(key, value, depth)?
        };
        clauses.push(clause);
    }
    Ok(match clauses.len() {
        0 => Filter::True,
        1 => clauses.remove(0),
        _ => Filter::And(clauses),
    })
}

fn logical_arms(key: &str, value: &Bson, depth: usize) -> Result<Vec<Filter>, StoreError> {
    let Bson::Array(items) = value else {
        return Err(malformed(format!("{key} expects an array")));
    };
    if items.is_empty() {
        return Err(malformed(format!("{key} expects a non-empty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => from_document_at(d, depth + 1),
            _ => Err(malformed(format!("{key} arms must be documents"))),
        })
        .collect()
}

fn is_operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_clause(path: &str, value: &Bson, depth: usize) -> Result<Filter, StoreError> {
    let Some(ops) = is_operator_document(value) else {
        return Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.clone() });
    };
    let mut clauses = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let clause = match op.as_str() {
            "$eq" => cmp(path, CmpOp::Eq, operand),
            "$ne" => cmp(path, CmpOp::Ne, operand),
            "$gt" => cmp(path, CmpOp::Gt, operand),
            "$gte" => cmp(path, CmpOp::Gte, operand),
            "$lt" => cmp(path, CmpOp::Lt, operand),
            "$lte" => cmp(path, CmpOp::Lte, operand),
            "$in" | "$nin" => {
                let Bson::Array(values) = operand else {
                    return Err(malformed(format!("{op} expects an array")));
                };
                if values.len() > MAX_IN_SET {
                    return Err(malformed(format!("{op} accepts at most {MAX_IN_SET} values")));
                }
                let values = values.clone();
                if op == "$in" {
                    Filter::In { path: path.to_string(), values }
                } else {
                    Filter::Nin { path: path.to_string(), values }
                }
            }
            "$exists" => match operand {
                Bson::Boolean(b) => Filter::Exists { path: path.to_string(), exists: *b },
                Bson::Int32(i) => Filter::Exists { path: path.to_string(), exists: *i != 0 },
                Bson::Int64(i) => Filter::Exists { path: path.to_string(), exists: *i != 0 },
                _ => return Err(malformed("$exists expects a boolean")),
            },
            "$not" => {
                if is_operator_document(operand).is_none() {
                    return Err(malformed("$not expects an operator document"));
                }
                if depth > MAX_FILTER_DEPTH {
                    return Err(malformed("filter nested too deeply"));
                }
                Filter::Not(Box::new(field_clause(path, operand, depth + 1)?))
            }
            #[cfg(feature = "regex")]
            "$regex" => {
                let Bson::String(pattern) = operand else {
                    return Err(malformed("$regex expects a string"));
                };
                let case_insensitive =
                    matches!(ops.get("$options"), Some(Bson::String(o)) if o.contains('i'));
                regex::RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| malformed(format!("$regex: {e}")))?;
                Filter::Regex { path: path.to_string(), pattern: pattern.clone(), case_insensitive }
            }
            #[cfg(feature = "regex")]
            "$options" if ops.contains_key("$regex") => continue,
            other => return Err(malformed(format!("unsupported operator '{other}' on '{path}'"))),
        };
        clauses.push(clause);
    }
    Ok(if clauses.len() == 1 { clauses.remove(0) } else { Filter::And(clauses) })
}

fn cmp(path: &str, op: CmpOp, operand: &Bson) -> Filter {
    Filter::Cmp { path: path.to_string(), op, value: operand.clone() }
}
