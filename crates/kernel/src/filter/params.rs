//! Request parameters synthesized from a field set.
//!
//! Every exposed field gets one bare parameter bound to its default operator
//! (`age`) and one parameter per operator (`age[gt]`). Each parameter carries
//! the type its raw value is decoded as.

use std::sync::Arc;

use super::field::{FieldDescriptor, FieldSet};
use super::operators::Operator;
use super::types::{FieldType, ParamType};
use crate::config::{self, AliasGenerator};

/// One synthesized request parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Internal key: `name` for the default slot, `name__op` otherwise.
    pub key: String,
    /// External query-string name.
    pub alias: String,
    pub field: String,
    pub operator: Operator,
    pub ty: ParamType,
    pub is_default: bool,
}

/// The synthesized parameters of a field set, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<ParamSpec>,
}

impl ParameterSet {
    /// Synthesize parameters using the alias generator from the active settings.
    pub fn new(fields: &FieldSet) -> Self {
        let generator = config::current().alias_generator().cloned();
        Self::with_alias_generator(fields, generator.as_ref())
    }

    /// Synthesize parameters with an explicit alias generator override.
    pub fn with_alias_generator(fields: &FieldSet, generator: Option<&AliasGenerator>) -> Self {
        let mut params = Vec::new();

        for field in fields.iter().filter(|f| !f.is_internal()) {
            if let Some(op) = field.default_operator() {
                params.push(ParamSpec {
                    key: field.name().to_string(),
                    alias: field.external_name().to_string(),
                    field: field.name().to_string(),
                    operator: op,
                    ty: adapt_type(field, op),
                    is_default: true,
                });
            }

            for &op in field.operators() {
                let alias = match generator {
                    Some(generate) => generate(field.name(), op, field.alias()),
                    None => generate_alias(field.name(), op, field.alias()),
                };
                params.push(ParamSpec {
                    key: format!("{}__{}", field.name(), op.as_str()),
                    alias,
                    field: field.name().to_string(),
                    operator: op,
                    ty: adapt_type(field, op),
                    is_default: false,
                });
            }
        }

        Self { params }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter()
    }

    /// Look a parameter up by its internal key.
    pub fn get(&self, key: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.key == key)
    }

    /// Look a parameter up by its external name.
    pub fn by_alias(&self, alias: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.alias == alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.alias.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Default external name: `alias_or_name[op]`.
pub fn generate_alias(name: &str, op: Operator, alias: Option<&str>) -> String {
    format!("{}[{}]", alias.unwrap_or(name), op.as_str())
}

/// Wrap a plain function as an [`AliasGenerator`].
pub fn alias_generator<F>(f: F) -> AliasGenerator
where
    F: Fn(&str, Operator, Option<&str>) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The type a parameter's raw value is decoded as.
///
/// Explicit per-operator overrides win, then `is_null` always takes a
/// boolean. Otherwise collections travel as comma-separated element lists,
/// pattern operators take text and membership operators take a list of the
/// scalar type.
pub fn adapt_type(field: &FieldDescriptor, op: Operator) -> ParamType {
    if let Some(ty) = field.op_type(op) {
        return ty.clone();
    }
    if op == Operator::IsNull {
        return ParamType::Single(FieldType::Bool);
    }

    let ty = field.field_type();
    if let Some(element) = ty.element() {
        return ParamType::CsvList(element.non_null().clone());
    }
    if op.is_pattern() {
        return ParamType::Single(FieldType::Str);
    }

    let scalar = ty.non_null().clone();
    if op.is_membership() {
        ParamType::CsvList(scalar)
    } else {
        ParamType::Single(scalar)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fields() -> FieldSet {
        FieldSet::builder()
            .add("age", FieldType::optional(FieldType::Int))
            .add("tags", FieldType::list(FieldType::Str))
            .field(FieldDescriptor::new("name", FieldType::Str).with_alias("n"))
            .field(FieldDescriptor::new("owner_id", FieldType::Int).internal())
            .build()
            .unwrap()
    }

    #[test]
    fn default_slot_precedes_operator_slots() {
        let params = ParameterSet::with_alias_generator(&fields(), None);
        let aliases: Vec<&str> = params.aliases().take(3).collect();
        assert_eq!(aliases, vec!["age", "age[is_null]", "age[eq]"]);

        let bare = params.get("age").unwrap();
        assert!(bare.is_default);
        assert_eq!(bare.operator, Operator::Eq);
    }

    #[test]
    fn alias_is_used_for_external_names() {
        let params = ParameterSet::with_alias_generator(&fields(), None);
        assert_eq!(params.get("name").unwrap().alias, "n");
        assert_eq!(params.get("name__like").unwrap().alias, "n[like]");
        assert!(params.by_alias("name[like]").is_none());
    }

    #[test]
    fn internal_fields_are_not_exposed() {
        let params = ParameterSet::with_alias_generator(&fields(), None);
        assert!(params.iter().all(|p| p.field != "owner_id"));
    }

    #[test]
    fn alias_generator_override() {
        let generator = alias_generator(|name, op, _| format!("{name}.{op}"));
        let params = ParameterSet::with_alias_generator(&fields(), Some(&generator));
        assert!(params.by_alias("age.gt").is_some());
        // The bare slot keeps the plain name.
        assert!(params.by_alias("age").is_some());
    }

    #[test]
    fn types_are_adapted_per_operator() {
        let params = ParameterSet::with_alias_generator(&fields(), None);
        let ty = |key: &str| params.get(key).unwrap().ty.clone();

        assert_eq!(ty("age"), ParamType::Single(FieldType::Int));
        assert_eq!(ty("age__is_null"), ParamType::Single(FieldType::Bool));
        assert_eq!(ty("age__in"), ParamType::CsvList(FieldType::Int));
        assert_eq!(ty("tags"), ParamType::CsvList(FieldType::Str));
        assert_eq!(ty("tags__contains"), ParamType::CsvList(FieldType::Str));
        assert_eq!(ty("name__ilike"), ParamType::Single(FieldType::Str));
    }

    #[test]
    fn is_null_on_optional_list_takes_a_bool() {
        let labels = FieldType::optional(FieldType::list(FieldType::Str));
        let field = FieldDescriptor::new("labels", labels);
        assert_eq!(
            adapt_type(&field, Operator::IsNull),
            ParamType::Single(FieldType::Bool)
        );
        assert_eq!(
            adapt_type(&field, Operator::Overlap),
            ParamType::CsvList(FieldType::Str)
        );
    }

    #[test]
    fn explicit_op_type_wins() {
        let field = FieldDescriptor::new("code", FieldType::Int)
            .with_op_type(Operator::Eq, ParamType::Single(FieldType::Str));
        assert_eq!(
            adapt_type(&field, Operator::Eq),
            ParamType::Single(FieldType::Str)
        );
        assert_eq!(
            adapt_type(&field, Operator::Gt),
            ParamType::Single(FieldType::Int)
        );
    }
}
