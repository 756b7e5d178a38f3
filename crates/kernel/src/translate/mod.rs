//! Translate resolved filters and sorting into backend conditions.
//!
//! Every backend implements [`Backend`]. The free functions here run the
//! shared algorithm: build the field namespace, then for each
//! `(field, operator, value)` triple try the per-call [`FilterHook`], the
//! global one from [`crate::config`], and finally the backend's own
//! predicate table. Conditions are attached through the same chain of
//! [`ConditionHook`]s before falling back to a plain conjunction.

pub mod document;
pub mod raw_sql;
pub mod relational;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Error, Result};
use crate::filter::{FilterValue, FilterValues, Operator};
use crate::sorting::{NullsOrder, SortDirection, SortValues};

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// A query representation that filters and orderings can be applied to.
pub trait Backend: Send + Sync + 'static {
    /// The query being built.
    type Query;
    /// A column or attribute reference.
    type Expr: Clone;
    /// A single predicate.
    type Condition: Clone;

    /// Field name -> expression for every entity `query` references.
    fn namespace(&self, query: &Self::Query) -> Namespace<Self::Expr>;

    /// Build the predicate for `expr <op> value`.
    ///
    /// Fails with [`Error::UnsupportedOperator`] when the backend has no
    /// predicate for `op`.
    fn condition(
        &self,
        op: Operator,
        expr: &Self::Expr,
        value: &FilterValue,
    ) -> Result<Self::Condition>;

    /// Conjoin `condition` onto the query.
    fn add_condition(&self, query: &mut Self::Query, condition: Self::Condition);

    /// Append one ordering clause.
    fn add_ordering(
        &self,
        query: &mut Self::Query,
        expr: &Self::Expr,
        direction: SortDirection,
        nulls: Option<NullsOrder>,
    );
}

/// Raw SQL dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
}

impl Dialect {
    /// Whether placeholders are numbered (`$1`) rather than anonymous (`?`).
    pub fn is_positional(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(Error::UnknownDialect(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// Field name -> backend expression.
#[derive(Debug, Clone)]
pub struct Namespace<E> {
    entries: HashMap<String, E>,
}

impl<E> Default for Namespace<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<E> Namespace<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, expr: E) -> Option<E> {
        self.entries.insert(name.into(), expr)
    }

    pub fn with(mut self, name: impl Into<String>, expr: E) -> Self {
        self.insert(name, expr);
        self
    }

    pub fn get(&self, name: &str) -> Option<&E> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Add every entry of `other`, overriding existing names.
    pub fn extend(&mut self, other: Namespace<E>) {
        self.entries.extend(other.entries);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E, S: Into<String>> FromIterator<(S, E)> for Namespace<E> {
    fn from_iter<I: IntoIterator<Item = (S, E)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Result of a hook that may decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome<T> {
    Applied(T),
    /// Fall through to the next handler.
    NotApplicable,
}

/// Overrides predicate construction for some `(field, operator)` pairs.
///
/// Hooks see the field under its remapped name, if [`ApplyOptions::remap`]
/// gave it one.
pub trait FilterHook<B: Backend>: Send + Sync {
    fn apply(
        &self,
        query: &B::Query,
        namespace: &Namespace<B::Expr>,
        field: &str,
        op: Operator,
        value: &FilterValue,
    ) -> anyhow::Result<HookOutcome<B::Condition>>;
}

impl<B, F> FilterHook<B> for F
where
    B: Backend,
    F: Fn(
            &B::Query,
            &Namespace<B::Expr>,
            &str,
            Operator,
            &FilterValue,
        ) -> anyhow::Result<HookOutcome<B::Condition>>
        + Send
        + Sync,
{
    fn apply(
        &self,
        query: &B::Query,
        namespace: &Namespace<B::Expr>,
        field: &str,
        op: Operator,
        value: &FilterValue,
    ) -> anyhow::Result<HookOutcome<B::Condition>> {
        self(query, namespace, field, op, value)
    }
}

/// Overrides how a built predicate is attached to the query.
pub trait ConditionHook<B: Backend>: Send + Sync {
    fn add(
        &self,
        query: &mut B::Query,
        field: &str,
        condition: &B::Condition,
    ) -> anyhow::Result<HookOutcome<()>>;
}

impl<B, F> ConditionHook<B> for F
where
    B: Backend,
    F: Fn(&mut B::Query, &str, &B::Condition) -> anyhow::Result<HookOutcome<()>> + Send + Sync,
{
    fn add(
        &self,
        query: &mut B::Query,
        field: &str,
        condition: &B::Condition,
    ) -> anyhow::Result<HookOutcome<()>> {
        self(query, field, condition)
    }
}

/// Box a closure as a [`FilterHook`].
pub fn filter_hook<B, F>(hook: F) -> Arc<dyn FilterHook<B>>
where
    B: Backend,
    F: Fn(
            &B::Query,
            &Namespace<B::Expr>,
            &str,
            Operator,
            &FilterValue,
        ) -> anyhow::Result<HookOutcome<B::Condition>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(hook)
}

/// Box a closure as a [`ConditionHook`].
pub fn condition_hook<B, F>(hook: F) -> Arc<dyn ConditionHook<B>>
where
    B: Backend,
    F: Fn(&mut B::Query, &str, &B::Condition) -> anyhow::Result<HookOutcome<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(hook)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call knobs for the apply functions.
pub struct ApplyOptions<B: Backend> {
    remapping: HashMap<String, String>,
    namespace: Namespace<B::Expr>,
    filter_hook: Option<Arc<dyn FilterHook<B>>>,
    condition_hook: Option<Arc<dyn ConditionHook<B>>>,
}

impl<B: Backend> Default for ApplyOptions<B> {
    fn default() -> Self {
        Self {
            remapping: HashMap::new(),
            namespace: Namespace::new(),
            filter_hook: None,
            condition_hook: None,
        }
    }
}

impl<B: Backend> Clone for ApplyOptions<B> {
    fn clone(&self) -> Self {
        Self {
            remapping: self.remapping.clone(),
            namespace: self.namespace.clone(),
            filter_hook: self.filter_hook.clone(),
            condition_hook: self.condition_hook.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for ApplyOptions<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("remapping", &self.remapping)
            .field("namespace", &self.namespace.len())
            .field("filter_hook", &self.filter_hook.is_some())
            .field("condition_hook", &self.condition_hook.is_some())
            .finish()
    }
}

impl<B: Backend> ApplyOptions<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look `field` up under `target` instead of its own name.
    pub fn remap(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.remapping.insert(field.into(), target.into());
        self
    }

    pub fn with_remapping<I, K, V>(mut self, remapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.remapping
            .extend(remapping.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Extra namespace entries, taking precedence over reflected ones.
    pub fn with_namespace(mut self, namespace: Namespace<B::Expr>) -> Self {
        self.namespace.extend(namespace);
        self
    }

    pub fn expr(mut self, name: impl Into<String>, expr: B::Expr) -> Self {
        self.namespace.insert(name, expr);
        self
    }

    pub fn with_filter_hook(mut self, hook: Arc<dyn FilterHook<B>>) -> Self {
        self.filter_hook = Some(hook);
        self
    }

    pub fn with_condition_hook(mut self, hook: Arc<dyn ConditionHook<B>>) -> Self {
        self.condition_hook = Some(hook);
        self
    }

    pub fn remapping(&self) -> &HashMap<String, String> {
        &self.remapping
    }

    /// Name `field` is looked up under.
    pub fn target<'a>(&'a self, field: &'a str) -> &'a str {
        self.remapping.get(field).map_or(field, String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

fn namespace_for<B: Backend>(
    backend: &B,
    query: &B::Query,
    options: &ApplyOptions<B>,
) -> Namespace<B::Expr> {
    let mut namespace = backend.namespace(query);
    namespace.extend(options.namespace.clone());
    namespace
}

fn resolve<'a, B: Backend>(
    namespace: &'a Namespace<B::Expr>,
    options: &ApplyOptions<B>,
    field: &str,
) -> Result<&'a B::Expr> {
    namespace
        .get(options.target(field))
        .ok_or_else(|| Error::UnknownField(field.to_string()))
}

fn hook_error(field: &str, source: anyhow::Error) -> Error {
    Error::Hook {
        field: field.to_string(),
        source,
    }
}

/// Build the predicate for one triple: per-call hook, global hook, then the
/// backend's own table.
pub fn build_condition<B: Backend>(
    backend: &B,
    query: &B::Query,
    namespace: &Namespace<B::Expr>,
    options: &ApplyOptions<B>,
    field: &str,
    op: Operator,
    value: &FilterValue,
) -> Result<B::Condition> {
    let global = config::current().filter_hook::<B>();
    let hooks = options.filter_hook.iter().chain(global.iter());
    let target = options.target(field);

    for hook in hooks {
        match hook
            .apply(query, namespace, target, op, value)
            .map_err(|e| hook_error(target, e))?
        {
            HookOutcome::Applied(condition) => return Ok(condition),
            HookOutcome::NotApplicable => {
                tracing::debug!(field = %target, operator = %op, "filter hook declined");
            }
        }
    }

    let expr = resolve(namespace, options, field)?;
    backend.condition(op, expr, value)
}

fn attach_condition<B: Backend>(
    backend: &B,
    query: &mut B::Query,
    options: &ApplyOptions<B>,
    field: &str,
    condition: B::Condition,
) -> Result<()> {
    let global = config::current().condition_hook::<B>();
    let hooks = options.condition_hook.iter().chain(global.iter());
    let target = options.target(field);

    for hook in hooks {
        match hook
            .add(query, target, &condition)
            .map_err(|e| hook_error(target, e))?
        {
            HookOutcome::Applied(()) => return Ok(()),
            HookOutcome::NotApplicable => {
                tracing::debug!(field = %target, "condition hook declined");
            }
        }
    }

    backend.add_condition(query, condition);
    Ok(())
}

/// Conjoin every filter onto `query`.
pub fn apply_filters<B: Backend>(
    backend: &B,
    mut query: B::Query,
    values: &FilterValues,
    options: &ApplyOptions<B>,
) -> Result<B::Query> {
    let namespace = namespace_for(backend, &query, options);

    for (field, op, value) in values.triples() {
        let condition = build_condition(backend, &query, &namespace, options, field, op, value)?;
        attach_condition(backend, &mut query, options, field, condition)?;
        tracing::trace!(field = %field, operator = %op, "applied filter");
    }

    Ok(query)
}

/// Append every sort key to `query`, in order.
pub fn apply_sorting<B: Backend>(
    backend: &B,
    mut query: B::Query,
    values: &SortValues,
    options: &ApplyOptions<B>,
) -> Result<B::Query> {
    let namespace = namespace_for(backend, &query, options);

    for value in values {
        let expr = resolve(&namespace, options, &value.field)?;
        backend.add_ordering(&mut query, expr, value.direction, value.nulls_order());
        tracing::trace!(field = %value.field, direction = %value.direction, "applied ordering");
    }

    Ok(query)
}

pub fn apply_filters_and_sorting<B: Backend>(
    backend: &B,
    query: B::Query,
    filters: &FilterValues,
    sorting: &SortValues,
    options: &ApplyOptions<B>,
) -> Result<B::Query> {
    let query = apply_filters(backend, query, filters, options)?;
    apply_sorting(backend, query, sorting, options)
}
