//! Turn raw query parameters into [`FilterValues`].

use std::fmt;
use std::sync::Arc;

use super::field::FieldSet;
use super::params::{ParamSpec, ParameterSet};
use super::values::{FilterSet, FilterValues};
use crate::config::AliasGenerator;
use crate::error::{ValidationError, ValidationErrors};

/// Raw query parameters as an ordered multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Every value supplied for `key`, in request order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Last value supplied for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

type ResolvedCallback = Arc<dyn Fn(&mut FilterValues) + Send + Sync>;

/// Resolves request parameters for one field set.
///
/// Built once and shared; resolution never mutates the resolver.
#[derive(Clone)]
pub struct FilterResolver {
    fields: Arc<FieldSet>,
    params: ParameterSet,
    on_resolved: Option<ResolvedCallback>,
}

impl fmt::Debug for FilterResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterResolver")
            .field("fields", &self.fields.len())
            .field("params", &self.params.len())
            .field("on_resolved", &self.on_resolved.is_some())
            .finish()
    }
}

impl FilterResolver {
    /// Synthesize parameters using the active settings.
    pub fn new(fields: FieldSet) -> Self {
        let params = ParameterSet::new(&fields);
        Self {
            fields: Arc::new(fields),
            params,
            on_resolved: None,
        }
    }

    /// Re-synthesize parameters with an explicit alias generator.
    pub fn with_alias_generator(mut self, generator: AliasGenerator) -> Self {
        self.params = ParameterSet::with_alias_generator(&self.fields, Some(&generator));
        self
    }

    /// Run `callback` on every successfully resolved value map.
    pub fn on_resolved<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut FilterValues) + Send + Sync + 'static,
    {
        self.on_resolved = Some(Arc::new(callback));
        self
    }

    pub fn fields(&self) -> &Arc<FieldSet> {
        &self.fields
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Decode every supplied parameter.
    ///
    /// Absent parameters are skipped. All decoding errors are collected
    /// before failing. When both the bare and the explicit slot of the same
    /// operator are supplied, the later parameter in declaration order wins.
    pub fn resolve(&self, query: &QueryParams) -> Result<FilterValues, ValidationErrors> {
        let mut values = FilterValues::new();
        let mut errors = ValidationErrors::new();

        for param in self.params.iter() {
            let raw = query.get_all(&param.alias);
            if raw.is_empty() {
                continue;
            }
            match param.ty.decode(&raw) {
                Ok(value) => {
                    values.insert(&param.field, param.operator, value);
                }
                Err(issues) => errors.extend(located(param, issues)),
            }
        }

        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "filter parameters failed validation");
            return Err(errors);
        }

        if let Some(callback) = &self.on_resolved {
            callback(&mut values);
        }
        tracing::debug!(fields = values.len(), "resolved filters");
        Ok(values)
    }

    /// Parse and resolve a raw query string.
    pub fn resolve_query(&self, query: &str) -> Result<FilterValues, ValidationErrors> {
        self.resolve(&QueryParams::parse(query))
    }

    /// Resolve into a [`FilterSet`] bound to this resolver's fields.
    pub fn resolve_set(&self, query: &QueryParams) -> Result<FilterSet, ValidationErrors> {
        let values = self.resolve(query)?;
        Ok(FilterSet::from_parts(Arc::clone(&self.fields), values))
    }
}

fn located(
    param: &ParamSpec,
    issues: Vec<ValidationError>,
) -> impl Iterator<Item = ValidationError> + '_ {
    issues
        .into_iter()
        .map(move |issue| issue.within(["query", param.alias.as_str()]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::LocItem;
    use crate::filter::{FieldType, FilterValue, Operator};

    fn resolver() -> FilterResolver {
        FilterResolver::new(
            FieldSet::builder()
                .add("age", FieldType::Int)
                .add("name", FieldType::Str)
                .add("languages", FieldType::list(FieldType::Str))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn query_params_keep_repeated_keys() {
        let params = QueryParams::parse("?a=1&b=2&a=3");
        assert_eq!(params.get_all("a"), vec!["1", "3"]);
        assert_eq!(params.get("a"), Some("3"));
        assert!(!params.contains("c"));
    }

    #[test]
    fn query_params_decode_brackets() {
        let params = QueryParams::parse("age%5Bgt%5D=10&name=a+b");
        assert_eq!(params.get("age[gt]"), Some("10"));
        assert_eq!(params.get("name"), Some("a b"));
    }

    #[test]
    fn absent_parameters_are_skipped() {
        let values = resolver().resolve_query("").unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn bare_parameter_uses_default_operator() {
        let values = resolver().resolve_query("age=10&languages=en,ua").unwrap();
        assert_eq!(values.get_op("age", Operator::Eq), Some(&FilterValue::Int(10)));
        assert_eq!(
            values.get_op("languages", Operator::Overlap),
            Some(&FilterValue::from(vec!["en", "ua"]))
        );
    }

    #[test]
    fn explicit_slot_wins_over_bare() {
        let values = resolver().resolve_query("age=1&age[eq]=2").unwrap();
        assert_eq!(values.get_op("age", Operator::Eq), Some(&FilterValue::Int(2)));
    }

    #[test]
    fn errors_are_collected_and_located() {
        let errors = resolver()
            .resolve_query("age=x&age[in]=1,y,3")
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.detail[0].loc,
            vec![LocItem::Key("query".into()), LocItem::Key("age".into())]
        );
        assert_eq!(
            errors.detail[1].loc,
            vec![
                LocItem::Key("query".into()),
                LocItem::Key("age[in]".into()),
                LocItem::Index(1)
            ]
        );
    }

    #[test]
    fn unsupported_operator_parameter_is_ignored() {
        // `age[like]` is not a synthesized parameter, so it never reaches the values.
        let values = resolver().resolve_query("age[like]=1%").unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn on_resolved_sees_final_values() {
        let resolver = resolver().on_resolved(|values| {
            values.remove_field("name");
        });
        let values = resolver.resolve_query("name=x&age=1").unwrap();
        assert!(values.get("name").is_none());
        assert!(values.get("age").is_some());
    }

    #[test]
    fn resolve_set_binds_fields() {
        let set = resolver()
            .resolve_set(&QueryParams::parse("age[gt]=3"))
            .unwrap();
        assert_eq!(set.fields().len(), 3);
        assert_eq!(
            set.filter_values().get_op("age", Operator::Gt),
            Some(&FilterValue::Int(3))
        );
    }
}
