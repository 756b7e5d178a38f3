//! Sort parameter resolution.
//!
//! A [`SortingResolver`] whitelists fields and accepts a single
//! comma-separated `sort` parameter of `+field` / `-field` tokens.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, LocItem, Result, ValidationError, ValidationErrors};
use crate::filter::types::{expected_literals, split_csv};
use crate::filter::{FieldType, QueryParams};

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    /// Token prefix: `+` or `-`.
    pub fn sign(self) -> char {
        match self {
            SortDirection::Asc => '+',
            SortDirection::Desc => '-',
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(Error::UnknownSortDirection(other.to_string())),
        }
    }
}

/// Where NULLs land relative to other values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NullsPolicy {
    /// NULL sorts as the largest value.
    Bigger,
    /// NULL sorts as the smallest value.
    Smaller,
}

impl FromStr for NullsPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bigger" => Ok(NullsPolicy::Bigger),
            "smaller" => Ok(NullsPolicy::Smaller),
            other => Err(Error::UnknownNullsPolicy(other.to_string())),
        }
    }
}

/// NULL ordering clause.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

impl NullsOrder {
    pub fn for_policy(direction: SortDirection, policy: NullsPolicy) -> Self {
        match (direction, policy) {
            (SortDirection::Asc, NullsPolicy::Bigger) => NullsOrder::Last,
            (SortDirection::Asc, NullsPolicy::Smaller) => NullsOrder::First,
            (SortDirection::Desc, NullsPolicy::Bigger) => NullsOrder::First,
            (SortDirection::Desc, NullsPolicy::Smaller) => NullsOrder::Last,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortValue {
    pub field: String,
    pub direction: SortDirection,
    pub nulls: Option<NullsPolicy>,
}

impl SortValue {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
            nulls: None,
        }
    }

    pub fn with_nulls(mut self, policy: NullsPolicy) -> Self {
        self.nulls = Some(policy);
        self
    }

    /// NULL ordering clause implied by the direction and policy.
    pub fn nulls_order(&self) -> Option<NullsOrder> {
        self.nulls
            .map(|policy| NullsOrder::for_policy(self.direction, policy))
    }

    /// `+field` or `-field`.
    pub fn token(&self) -> String {
        format!("{}{}", self.direction.sign(), self.field)
    }
}

/// Ordered sort keys; the first is the primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SortValues(Vec<SortValue>);

impl SortValues {
    pub fn new(values: Vec<SortValue>) -> Self {
        Self(values)
    }

    /// Build from `(field, direction, nulls)` strings.
    pub fn from_raw<'a, I>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str, Option<&'a str>)>,
    {
        raw.into_iter()
            .map(|(field, direction, nulls)| {
                Ok(SortValue {
                    field: field.to_string(),
                    direction: direction.parse()?,
                    nulls: nulls.map(str::parse).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SortValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<SortValue> {
        self.0
    }
}

impl<'a> IntoIterator for &'a SortValues {
    type Item = &'a SortValue;
    type IntoIter = std::slice::Iter<'a, SortValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<SortValue> for SortValues {
    fn from_iter<I: IntoIterator<Item = SortValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Resolves the sort parameter against a field whitelist.
#[derive(Debug, Clone)]
pub struct SortingResolver {
    param: String,
    tokens: Vec<(String, SortValue)>,
    default: SortValues,
}

impl SortingResolver {
    pub fn builder() -> SortingResolverBuilder {
        SortingResolverBuilder::default()
    }

    /// Query parameter name.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// Every accepted token, `+` tokens first.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|(token, _)| token.as_str())
    }

    pub fn default_values(&self) -> &SortValues {
        &self.default
    }

    /// Resolve the sort parameter. An absent parameter yields the default.
    pub fn resolve(&self, query: &QueryParams) -> Result<SortValues, ValidationErrors> {
        let raw = query.get_all(&self.param);
        let items: Vec<&str> = match raw.as_slice() {
            [] => return Ok(self.default.clone()),
            [""] => Vec::new(),
            [single] => split_csv(single),
            many => many.to_vec(),
        };

        let mut values = Vec::with_capacity(items.len());
        let mut errors = ValidationErrors::new();
        for (index, token) in items.into_iter().enumerate() {
            match self.lookup(&normalize_token(token)) {
                Some(value) => values.push(value.clone()),
                None => errors.push(
                    ValidationError::new(
                        "literal_error",
                        format!("Input should be {}", self.expected()),
                        token,
                    )
                    .within([LocItem::from("query"), LocItem::from(self.param.as_str())])
                    .at(index),
                ),
            }
        }

        if !errors.is_empty() {
            tracing::debug!(errors = errors.len(), "sort parameter failed validation");
            return Err(errors);
        }
        tracing::debug!(keys = values.len(), "resolved sorting");
        Ok(SortValues(values))
    }

    pub fn resolve_query(&self, query: &str) -> Result<SortValues, ValidationErrors> {
        self.resolve(&QueryParams::parse(query))
    }

    fn lookup(&self, token: &str) -> Option<&SortValue> {
        self.tokens
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, value)| value)
    }

    fn expected(&self) -> String {
        let tokens: Vec<&str> = self.tokens().collect();
        expected_literals(&tokens)
    }
}

/// An unescaped `+` arrives form-decoded as a space.
fn normalize_token(token: &str) -> Cow<'_, str> {
    match token.strip_prefix(' ') {
        Some(rest) => Cow::Owned(format!("+{rest}")),
        None => Cow::Borrowed(token),
    }
}

/// Builder for [`SortingResolver`].
#[derive(Debug, Default)]
pub struct SortingResolverBuilder {
    fields: Vec<(String, Option<NullsPolicy>)>,
    default: Vec<String>,
    alias: Option<String>,
}

impl SortingResolverBuilder {
    pub fn field(self, name: impl Into<String>) -> Self {
        self.push(name.into(), None)
    }

    pub fn field_with_nulls(self, name: impl Into<String>, policy: NullsPolicy) -> Self {
        self.push(name.into(), Some(policy))
    }

    /// Whitelist every column except collections.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        for (name, ty) in columns {
            if !ty.is_sequence() {
                self = self.push(name.into(), None);
            }
        }
        self
    }

    /// Tokens used when the parameter is absent, e.g. `["-created_at"]`.
    /// A token may itself be comma-separated.
    pub fn default_sort<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.default = tokens
            .into_iter()
            .flat_map(|t| {
                t.as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        self
    }

    /// Query parameter name (default `sort`).
    pub fn alias(mut self, param: impl Into<String>) -> Self {
        self.alias = Some(param.into());
        self
    }

    pub fn build(self) -> Result<SortingResolver> {
        let mut tokens = Vec::with_capacity(self.fields.len() * 2);
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            for (field, nulls) in &self.fields {
                let value = SortValue {
                    field: field.clone(),
                    direction,
                    nulls: *nulls,
                };
                tokens.push((value.token(), value));
            }
        }

        let mut default = Vec::with_capacity(self.default.len());
        let mut unknown = Vec::new();
        for token in &self.default {
            match tokens.iter().find(|(t, _)| t == token) {
                Some((_, value)) => default.push(value.clone()),
                None => unknown.push(token.as_str()),
            }
        }
        if !unknown.is_empty() {
            let allowed: Vec<&str> = self.fields.iter().map(|(f, _)| f.as_str()).collect();
            return Err(Error::InvalidDefaultSort {
                field: unknown.join(","),
                allowed: allowed.join(","),
            });
        }

        Ok(SortingResolver {
            param: self.alias.unwrap_or_else(|| "sort".to_string()),
            tokens,
            default: SortValues(default),
        })
    }

    fn push(mut self, name: String, nulls: Option<NullsPolicy>) -> Self {
        match self.fields.iter_mut().find(|(f, _)| *f == name) {
            Some(slot) => slot.1 = nulls,
            None => self.fields.push((name, nulls)),
        }
        self
    }
}
