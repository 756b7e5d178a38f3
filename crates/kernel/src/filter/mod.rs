//! Filter declaration and resolution.
//!
//! A [`FieldSet`] declares filterable fields. A [`FilterResolver`] exposes
//! them as `field` / `field[op]` query parameters and decodes a request into
//! [`FilterValues`], which the `translate` backends turn into conditions.

pub mod field;
pub mod operators;
pub mod params;
pub mod resolver;
pub mod types;
pub mod values;

pub use field::{FieldDescriptor, FieldSet, FieldSetBuilder, FilterOp};
pub use operators::{Operator, default_operator_for, default_operators, operators_for};
pub use params::{ParamSpec, ParameterSet, adapt_type, generate_alias};
pub use resolver::{FilterResolver, QueryParams};
pub use types::{FieldType, FilterValue, ParamType};
pub use values::{FilterSet, FilterValues, OperatorValues};
