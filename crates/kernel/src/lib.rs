//! Strainer
//!
//! Declarative filtering and sorting for HTTP list endpoints. Fields are
//! declared once, exposed as `field[op]=value` and `sort=-field` query
//! parameters, resolved into [`FilterValues`] / [`SortValues`], and
//! translated into relational (SeaQuery), document (Mongo-style JSON) or
//! raw SQL conditions.

pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod sorting;
pub mod translate;

pub use config::Settings;
pub use error::{Error, Result, ValidationError, ValidationErrors};
pub use extract::{FilterSchema, Filters, SortSchema, Sorting};
pub use filter::{
    FieldDescriptor, FieldSet, FieldType, FilterOp, FilterResolver, FilterSet, FilterValue,
    FilterValues, Operator, QueryParams,
};
pub use sorting::{
    NullsOrder, NullsPolicy, SortDirection, SortValue, SortValues, SortingResolver,
};
pub use translate::{
    apply_filters, apply_filters_and_sorting, apply_sorting, ApplyOptions, Backend, Dialect,
};
