use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use super::types::{CmpOp, Filter, MAX_IN_SET, MAX_PATH_DEPTH, MAX_SORT_FIELDS, Order, SortSpec};

pub fn eval_filter(doc: &BsonDocument, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Nor(fs) => !fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(f) => !eval_filter(doc, f),
        Filter::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Filter::In { path, values } => in_set(get_path(doc, path), values),
        Filter::Nin { path, values } => !in_set(get_path(doc, path), values),
        Filter::Cmp { path, op, value } => {
            let found = get_path(doc, path);
            match op {
                CmpOp::Eq => matches_eq(found, value),
                CmpOp::Ne => !matches_eq(found, value),
                CmpOp::Gt => matches_ord(found, value, |o| o == Ordering::Greater),
                CmpOp::Gte => matches_ord(found, value, |o| o != Ordering::Less),
                CmpOp::Lt => matches_ord(found, value, |o| o == Ordering::Less),
                CmpOp::Lte => matches_ord(found, value, |o| o != Ordering::Greater),
            }
        }
        #[cfg(feature = "regex")]
        Filter::Regex { path, pattern, case_insensitive } => {
            if let Some(Bson::String(s)) = get_path(doc, path) {
                let mut re = regex::RegexBuilder::new(pattern);
                re.case_insensitive(*case_insensitive);
                if let Ok(r) = re.build() { r.is_match(s) } else { false }
            } else {
                false
            }
        }
    }
}

/// Equality as the store defines it: a null operand also matches a missing field, and an
/// array field matches when any element is equal.
fn matches_eq(found: Option<&Bson>, value: &Bson) -> bool {
    match found {
        None => matches!(value, Bson::Null),
        Some(v) if values_equal(v, value) => true,
        Some(Bson::Array(items)) => items.iter().any(|i| values_equal(i, value)),
        Some(_) => false,
    }
}

fn matches_ord(found: Option<&Bson>, value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let cmp_one = |v: &Bson| comparable(v, value) && accept(compare_bson(v, value));
    match found {
        None => false,
        Some(Bson::Array(items)) if !matches!(value, Bson::Array(_)) => items.iter().any(cmp_one),
        Some(v) => cmp_one(v),
    }
}

fn in_set(found: Option<&Bson>, set: &[Bson]) -> bool {
    set.iter().take(MAX_IN_SET).any(|x| matches_eq(found, x))
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Range operators only match values of the same type class.
fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || a.element_type() == b.element_type()
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    if is_num(a) && is_num(b) {
        return compare_bson(a, b) == Ordering::Equal;
    }
    a == b
}

pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let va = get_path(a, &s.field);
        let vb = get_path(b, &s.field);
        let ord = match (va, vb) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

pub(crate) fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() > MAX_PATH_DEPTH {
        return None;
    }
    let (last, parents) = parts.split_last()?;
    let mut cur = doc;
    for part in parents {
        match cur.get(*part) {
            Some(Bson::Document(d)) => cur = d,
            _ => return None,
        }
    }
    cur.get(*last)
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        _ => f64::NAN,
    }
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::ObjectId(x), T::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (T::DateTime(x), T::DateTime(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

// Cross-type ordering follows the store's BSON comparison order.
fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Undefined | T::Null => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::Symbol(_) | T::String(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) => 12,
        T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 13,
        T::MaxKey => 255,
    }
}
