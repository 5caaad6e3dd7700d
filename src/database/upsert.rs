use crate::store::ReplaceOne;
use crate::types::{Document, ID_FIELD};
use bson::oid::ObjectId;
use bson::{Bson, doc};

/// Whether the serialized entity carries a usable identity: present, not null, not a blank string.
#[must_use]
pub fn has_identity(document: &Document) -> bool {
    match document.get(ID_FIELD) {
        None | Some(Bson::Null) => false,
        Some(Bson::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Derives the replace-with-upsert operation for one serialized entity.
///
/// With an identity the filter is `{_id: <id>}`, so repeated writes collapse onto one document.
/// Without one the filter is every field of the document plus `_id: null`, which no stored
/// document satisfies; the replacement gets a fresh identity, so each such write inserts.
#[must_use]
pub fn derive_upsert(mut document: Document) -> ReplaceOne {
    if has_identity(&document) {
        let id = document.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        return ReplaceOne { filter: doc! { ID_FIELD: id }, replacement: document };
    }
    document.remove(ID_FIELD);
    let mut filter = doc! { ID_FIELD: Bson::Null };
    for (key, value) in &document {
        filter.insert(key.clone(), value.clone());
    }
    let mut replacement = doc! { ID_FIELD: ObjectId::new() };
    for (key, value) in document {
        replacement.insert(key, value);
    }
    ReplaceOne { filter, replacement }
}
