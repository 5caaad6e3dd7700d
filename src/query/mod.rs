// Submodules for separation of concerns
mod eval;
mod expr;
mod parse;
mod types;

pub use eval::{compare_bson, compare_docs, eval_filter};
pub use expr::{
    Comparator, FilterExpression, NativeFilter, NativeSort, Predicate, Query, SortExpression,
};
pub use parse::{
    parse_filter_json, parse_filter_shape, parse_sort_json, sort_from_document, sort_to_document,
    validate_filter_shape,
};
pub use types::{CmpOp, FindOptions, Filter, Order, SortSpec};
