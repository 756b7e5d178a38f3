//! Normalized filter values: field -> operator -> value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::field::{FieldSet, FilterOp};
use super::operators::Operator;
use super::types::FilterValue;
use crate::error::{Error, Result};

/// Operators applied to one field, in canonical operator order.
pub type OperatorValues = BTreeMap<Operator, FilterValue>;

/// Per-request filter values keyed by field, in insertion order.
///
/// A field may map to an empty operator map; such entries are skipped by
/// [`FilterValues::iter`] and do not make the values non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterValues {
    entries: Vec<(String, OperatorValues)>,
}

impl FilterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build values from explicit triples. An operator given twice for the
    /// same field is an error.
    pub fn from_ops<I>(ops: I) -> Result<Self>
    where
        I: IntoIterator<Item = FilterOp>,
    {
        let mut values = Self::new();
        for op in ops {
            let slot = values.entry(&op.field);
            if slot.contains_key(&op.operator) {
                return Err(Error::DuplicateOperator {
                    field: op.field,
                    operator: op.operator,
                });
            }
            slot.insert(op.operator, op.value);
        }
        Ok(values)
    }

    /// Set `field[op] = value`, returning any previous value.
    pub fn insert(
        &mut self,
        field: &str,
        op: Operator,
        value: impl Into<FilterValue>,
    ) -> Option<FilterValue> {
        self.entry(field).insert(op, value.into())
    }

    /// Operator map of `field`, created empty if absent.
    pub fn entry(&mut self, field: &str) -> &mut OperatorValues {
        let index = match self.entries.iter().position(|(name, _)| name == field) {
            Some(index) => index,
            None => {
                self.entries.push((field.to_string(), OperatorValues::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn get(&self, field: &str) -> Option<&OperatorValues> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ops)| ops)
    }

    pub fn get_op(&self, field: &str, op: Operator) -> Option<&FilterValue> {
        self.get(field).and_then(|ops| ops.get(&op))
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.get(field).is_some_and(|ops| !ops.is_empty())
    }

    /// Remove a whole field.
    pub fn remove_field(&mut self, field: &str) -> Option<OperatorValues> {
        let index = self.entries.iter().position(|(name, _)| name == field)?;
        Some(self.entries.remove(index).1)
    }

    /// Remove one operator; the field is dropped once its map is empty.
    pub fn remove_op(&mut self, field: &str, op: Operator) -> Option<FilterValue> {
        let index = self.entries.iter().position(|(name, _)| name == field)?;
        let removed = self.entries[index].1.remove(&op);
        if self.entries[index].1.is_empty() {
            self.entries.remove(index);
        }
        removed
    }

    /// Fields with at least one operator.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OperatorValues)> {
        self.entries
            .iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(name, ops)| (name.as_str(), ops))
    }

    /// Every `(field, operator, value)` triple in field then operator order.
    pub fn triples(&self) -> impl Iterator<Item = (&str, Operator, &FilterValue)> {
        self.iter()
            .flat_map(|(name, ops)| ops.iter().map(move |(op, value)| (name, *op, value)))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(name, _)| name)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Number of non-empty fields.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Drop fields whose operator map is empty.
    pub fn normalize(&mut self) {
        self.entries.retain(|(_, ops)| !ops.is_empty());
    }
}

impl Serialize for FilterValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, ops) in self.iter() {
            map.serialize_entry(name, ops)?;
        }
        map.end()
    }
}

impl<'a> IntoIterator for &'a FilterValues {
    type Item = (&'a str, &'a OperatorValues);
    type IntoIter = Box<dyn Iterator<Item = Self::Item> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Filter values bound to the field set that declares them.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSet {
    fields: Arc<FieldSet>,
    values: FilterValues,
}

impl FilterSet {
    /// Empty filter set over `fields`.
    pub fn new(fields: Arc<FieldSet>) -> Self {
        Self {
            fields,
            values: FilterValues::new(),
        }
    }

    /// Wrap existing values, rejecting fields the set does not declare.
    pub fn create(fields: Arc<FieldSet>, values: FilterValues) -> Result<Self> {
        if let Some(unknown) = values.fields().find(|name| !fields.contains(name)) {
            return Err(Error::UnknownFilterField(unknown.to_string()));
        }
        Ok(Self { fields, values })
    }

    /// Values already known to only name declared fields.
    pub(crate) fn from_parts(fields: Arc<FieldSet>, values: FilterValues) -> Self {
        Self { fields, values }
    }

    /// Build from explicit triples; see [`FilterValues::from_ops`].
    pub fn from_ops<I>(fields: Arc<FieldSet>, ops: I) -> Result<Self>
    where
        I: IntoIterator<Item = FilterOp>,
    {
        Self::create(fields, FilterValues::from_ops(ops)?)
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn filter_values(&self) -> &FilterValues {
        &self.values
    }

    pub fn into_filter_values(self) -> FilterValues {
        self.values
    }

    pub fn get(&self, field: &str) -> Option<&OperatorValues> {
        self.values.get(field).filter(|ops| !ops.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove the given operators of `field`, or the whole field when `ops`
    /// is empty.
    pub fn remove_op(&mut self, field: &str, ops: &[Operator]) -> &mut Self {
        if ops.is_empty() {
            self.values.remove_field(field);
        } else {
            for op in ops {
                self.values.remove_op(field, *op);
            }
        }
        self
    }

    /// Copy of the values of the named fields.
    pub fn subset<'a, I>(&self, names: I) -> FilterValues
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut subset = FilterValues::new();
        for name in names {
            if let Some(ops) = self.get(name) {
                *subset.entry(name) = ops.clone();
            }
        }
        subset
    }

    /// Move the values of the named fields out of this set.
    ///
    /// In strict mode every name must be declared by the field set.
    pub fn extract<'a, I>(&mut self, names: I, strict: bool) -> Result<FilterValues>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        if strict && let Some(unknown) = names.iter().find(|name| !self.fields.contains(name)) {
            return Err(Error::UnknownFilterField(unknown.to_string()));
        }

        let mut extracted = FilterValues::new();
        for name in names {
            if let Some(ops) = self.values.remove_field(name)
                && !ops.is_empty()
            {
                *extracted.entry(name) = ops;
            }
        }
        Ok(extracted)
    }
}

impl Serialize for FilterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}
