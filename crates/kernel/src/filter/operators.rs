//! Filter operators and the per-type operator catalogue.
//!
//! The catalogue maps a declared [`FieldType`] to the operators that make
//! sense for it:
//! - nullable types additionally get `is_null`
//! - collections get exactly the four collection operators
//! - booleans get equality only
//! - text gets the pattern operators, numbers and times get ordering

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::FieldType;
use crate::config;
use crate::error::Error;

/// A comparison, membership, pattern, null-check or collection predicate.
///
/// Variant order is the canonical operator order used when iterating a
/// field's operator map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// SQL `LIKE` pattern.
    Like,
    /// Negated `LIKE`.
    NotLike,
    /// Case-insensitive `LIKE`.
    Ilike,
    /// Negated case-insensitive `LIKE`.
    NotIlike,
    /// Value in list.
    In,
    /// Value not in list.
    NotIn,
    /// Null check; the boolean operand selects `IS NULL` or `IS NOT NULL`.
    IsNull,
    /// Collections share at least one element.
    Overlap,
    /// Collections share no element.
    NotOverlap,
    /// Collection contains every given element.
    Contains,
    /// Collection does not contain every given element.
    NotContains,
}

impl Operator {
    /// Every operator in canonical order.
    pub const ALL: [Operator; 17] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::Like,
        Operator::NotLike,
        Operator::Ilike,
        Operator::NotIlike,
        Operator::In,
        Operator::NotIn,
        Operator::IsNull,
        Operator::Overlap,
        Operator::NotOverlap,
        Operator::Contains,
        Operator::NotContains,
    ];

    /// External name, as used in `field[op]` parameter aliases.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Like => "like",
            Operator::NotLike => "not_like",
            Operator::Ilike => "ilike",
            Operator::NotIlike => "not_ilike",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
            Operator::Overlap => "overlap",
            Operator::NotOverlap => "not_overlap",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
        }
    }

    /// Whether the operand is a pattern string regardless of field type.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::NotLike | Operator::Ilike | Operator::NotIlike
        )
    }

    /// Whether the operand is a list of scalars.
    pub fn is_membership(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `in_` is accepted for symmetry with the builder method name.
        let name = s.trim().trim_end_matches('_');
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| Error::UnknownOperator(s.to_string()))
    }
}

pub const DEFAULT_OPERATORS: [Operator; 4] =
    [Operator::Eq, Operator::Ne, Operator::In, Operator::NotIn];

pub const NUM_OPERATORS: [Operator; 4] =
    [Operator::Gt, Operator::Ge, Operator::Lt, Operator::Le];

pub const BOOL_OPERATORS: [Operator; 2] = [Operator::Eq, Operator::Ne];

pub const STR_OPERATORS: [Operator; 4] = [
    Operator::Like,
    Operator::Ilike,
    Operator::NotLike,
    Operator::NotIlike,
];

pub const SEQ_OPERATORS: [Operator; 4] = [
    Operator::Overlap,
    Operator::NotOverlap,
    Operator::Contains,
    Operator::NotContains,
];

/// The built-in operator generator, ignoring configuration.
pub fn default_operators(ty: &FieldType) -> Vec<Operator> {
    let mut ops = Vec::new();
    let mut ty = ty;

    if let FieldType::Optional(inner) = ty {
        ops.push(Operator::IsNull);
        ty = inner;
    }

    if ty.is_sequence() {
        ops.extend(SEQ_OPERATORS);
        return ops;
    }

    if matches!(ty, FieldType::Bool) {
        ops.extend(BOOL_OPERATORS);
        return ops;
    }

    ops.extend(DEFAULT_OPERATORS);

    if ty.is_textual() {
        ops.extend(STR_OPERATORS);
    }

    if ty.is_ordered() {
        ops.extend(NUM_OPERATORS);
    }

    ops
}

/// Operators applicable to `ty` under the active settings.
///
/// Uses the configured generator (or [`default_operators`]) and drops every
/// globally disabled operator. Never fails; the result may be empty.
pub fn operators_for(ty: &FieldType) -> Vec<Operator> {
    let settings = config::current();
    let generated = match settings.operators_generator() {
        Some(generator) => generator(ty),
        None => default_operators(ty),
    };

    let mut ops: Vec<Operator> = Vec::with_capacity(generated.len());
    for op in generated {
        if !settings.is_disabled(op) && !ops.contains(&op) {
            ops.push(op);
        }
    }
    ops
}

/// Operator bound to the bare `field` parameter.
pub fn default_operator_for(ty: &FieldType) -> Operator {
    if ty.is_sequence() {
        Operator::Overlap
    } else {
        Operator::Eq
    }
}
