//! Field descriptors and field sets.

use std::collections::{BTreeMap, BTreeSet};

use super::operators::{Operator, default_operator_for, operators_for};
use super::types::{FieldType, FilterValue, ParamType};
use crate::error::{Error, Result};

/// A single `(field, operator, value)` triple built programmatically.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOp {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
}

/// Declared metadata for one filterable attribute.
///
/// Operators and the default operator are inferred from the type at
/// construction, using the settings active at that moment, unless given
/// explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    ty: FieldType,
    alias: Option<String>,
    operators: Vec<Operator>,
    default_operator: Option<Operator>,
    explicit_default: bool,
    op_types: BTreeMap<Operator, ParamType>,
    internal: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let operators = operators_for(&ty);
        let mut field = Self {
            name: name.into(),
            ty,
            alias: None,
            operators,
            default_operator: None,
            explicit_default: false,
            op_types: BTreeMap::new(),
            internal: false,
        };
        field.infer_default();
        field
    }

    /// External name of the bare parameter and base of operator aliases.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Replace the inferred operator set. Duplicates are dropped.
    pub fn with_operators<I>(mut self, operators: I) -> Self
    where
        I: IntoIterator<Item = Operator>,
    {
        self.operators.clear();
        for op in operators {
            if !self.operators.contains(&op) {
                self.operators.push(op);
            }
        }
        if !self.explicit_default {
            self.infer_default();
        }
        self
    }

    pub fn with_default_operator(mut self, op: Operator) -> Self {
        self.default_operator = Some(op);
        self.explicit_default = true;
        self
    }

    /// Force the accepted parameter type for one operator.
    pub fn with_op_type(mut self, op: Operator, ty: ParamType) -> Self {
        self.op_types.insert(op, ty);
        self
    }

    /// Usable programmatically but never exposed as request parameters.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.ty
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Alias if set, otherwise the name.
    pub fn external_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// `None` only when the operator set is empty.
    pub fn default_operator(&self) -> Option<Operator> {
        self.default_operator
    }

    pub fn op_type(&self, op: Operator) -> Option<&ParamType> {
        self.op_types.get(&op)
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn allows(&self, op: Operator) -> bool {
        self.operators.contains(&op)
    }

    /// Check the descriptor's invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(op) = self.default_operator
            && !self.allows(op)
        {
            return Err(Error::DefaultOperatorNotAllowed {
                field: self.name.clone(),
                operator: op,
            });
        }
        if let Some(op) = self.op_types.keys().find(|op| !self.allows(**op)) {
            return Err(Error::OperatorNotAllowed {
                field: self.name.clone(),
                operator: *op,
            });
        }
        Ok(())
    }

    fn infer_default(&mut self) {
        let preferred = default_operator_for(&self.ty);
        self.default_operator = if self.allows(preferred) {
            Some(preferred)
        } else {
            self.operators.first().copied()
        };
    }

    /// Build a `(field, op, value)` triple, checking `op` is allowed.
    pub fn op(&self, operator: Operator, value: impl Into<FilterValue>) -> Result<FilterOp> {
        if !self.allows(operator) {
            return Err(Error::OperatorNotAllowed {
                field: self.name.clone(),
                operator,
            });
        }
        Ok(FilterOp {
            field: self.name.clone(),
            operator,
            value: value.into(),
        })
    }

    pub fn eq(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Eq, value)
    }

    pub fn ne(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Ne, value)
    }

    pub fn gt(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Gt, value)
    }

    pub fn ge(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Ge, value)
    }

    pub fn lt(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Lt, value)
    }

    pub fn le(&self, value: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Le, value)
    }

    pub fn in_(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::In, values)
    }

    pub fn not_in(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::NotIn, values)
    }

    pub fn like(&self, pattern: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Like, pattern)
    }

    pub fn not_like(&self, pattern: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::NotLike, pattern)
    }

    pub fn ilike(&self, pattern: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Ilike, pattern)
    }

    pub fn not_ilike(&self, pattern: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::NotIlike, pattern)
    }

    pub fn overlaps(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Overlap, values)
    }

    pub fn not_overlaps(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::NotOverlap, values)
    }

    pub fn contains(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::Contains, values)
    }

    pub fn not_contains(&self, values: impl Into<FilterValue>) -> Result<FilterOp> {
        self.op(Operator::NotContains, values)
    }

    pub fn is_null(&self, is_null: bool) -> Result<FilterOp> {
        self.op(Operator::IsNull, is_null)
    }
}

/// An ordered, immutable group of field descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<FieldDescriptor>,
}

impl FieldSet {
    pub fn builder() -> FieldSetBuilder {
        FieldSetBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Like [`FieldSet::get`], failing for undeclared names.
    pub fn field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::UnknownFilterField(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Builder for [`FieldSet`].
///
/// Later declarations of a name replace earlier ones in place. The
/// include/exclude filters only apply to fields declared through
/// [`FieldSetBuilder::columns`].
#[derive(Debug, Default)]
pub struct FieldSetBuilder {
    fields: Vec<(FieldDescriptor, bool)>,
    include: Option<BTreeSet<String>>,
    exclude: BTreeSet<String>,
}

impl FieldSetBuilder {
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.push(field, false);
        self
    }

    /// Declare a field with inferred operators.
    pub fn add(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(FieldDescriptor::new(name, ty))
    }

    /// Declare every column of an introspected model.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        for (name, ty) in columns {
            self.push(FieldDescriptor::new(name, ty), true);
        }
        self
    }

    /// Keep only these columns.
    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Drop these columns.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<FieldSet> {
        let include = self.include;
        let exclude = self.exclude;

        let fields: Vec<FieldDescriptor> = self
            .fields
            .into_iter()
            .filter(|(field, from_columns)| {
                !from_columns
                    || (include.as_ref().is_none_or(|inc| inc.contains(&field.name))
                        && !exclude.contains(&field.name))
            })
            .map(|(field, _)| field)
            .collect();

        for field in &fields {
            field.validate()?;
        }

        tracing::debug!(fields = fields.len(), "built field set");
        Ok(FieldSet { fields })
    }

    fn push(&mut self, field: FieldDescriptor, from_columns: bool) {
        match self.fields.iter_mut().find(|(f, _)| f.name == field.name) {
            Some(slot) => *slot = (field, from_columns),
            None => self.fields.push((field, from_columns)),
        }
    }
}
