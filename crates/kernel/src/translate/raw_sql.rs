//! Compile filters and sorting into standalone SQL fragments.
//!
//! The fragments are meant to be spliced into hand-written queries:
//!
//! ```text
//! SELECT * FROM users WHERE {filters.stmt()} ORDER BY {sorting.stmt()}
//! ```
//!
//! With a positional dialect the placeholders are numbered from
//! `arg_start`, so a second fragment compiled with
//! `arg_start = first.end()` never collides with the first one.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sea_query::{
    Expr, MysqlQueryBuilder, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Value,
};

use super::relational::{column_ref, order_by, predicate};
use super::{ApplyOptions, Backend, Namespace, apply_filters, apply_sorting};
use crate::config;
use crate::error::{Error, Result};
use crate::filter::{FilterValue, FilterValues, Operator};
use crate::sorting::{NullsOrder, SortDirection, SortValues};

pub use super::Dialect;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex literal"));

/// A compiled fragment and its bind arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    text: String,
    args: Vec<Value>,
    arg_start: usize,
    positional: bool,
}

impl CompiledStatement {
    fn new(text: String, args: Vec<Value>, arg_start: usize, positional: bool) -> Result<Self> {
        if arg_start.checked_add(args.len()).is_none() {
            return Err(Error::PlaceholderOverflow { arg_start });
        }
        let text = if positional && arg_start != 1 {
            shift_placeholders(&text, arg_start)?
        } else {
            text
        };
        Ok(Self {
            text,
            args,
            arg_start,
            positional,
        })
    }

    /// The fragment, without the `WHERE` / `ORDER BY` keyword.
    pub fn stmt(&self) -> &str {
        &self.text
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Arguments keyed `param_1`, `param_2`, ... in bind order.
    pub fn params(&self) -> Vec<(String, &Value)> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("param_{}", i + 1), v))
            .collect()
    }

    pub fn arg_start(&self) -> usize {
        self.arg_start
    }

    /// Index of the first placeholder a following fragment may use.
    ///
    /// Never overflows: construction rejects an `arg_start` that would.
    pub fn end(&self) -> usize {
        self.arg_start.saturating_add(self.args.len())
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.text, self.args)
    }
}

fn shift_placeholders(text: &str, arg_start: usize) -> Result<String> {
    let offset = arg_start.saturating_sub(1);
    let mut overflow = false;
    let shifted = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        match caps[1].parse::<usize>().ok().and_then(|n| n.checked_add(offset)) {
            Some(n) => format!("${n}"),
            None => {
                overflow = true;
                caps[0].to_string()
            }
        }
    });
    if overflow {
        return Err(Error::PlaceholderOverflow { arg_start });
    }
    Ok(shifted.into_owned())
}

/// Options for the `compile_*` functions.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    dialect: Option<Dialect>,
    arg_start: Option<usize>,
    remapping: HashMap<String, String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults to the configured dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Number of the first placeholder; defaults to 1.
    pub fn arg_start(mut self, arg_start: usize) -> Self {
        self.arg_start = Some(arg_start);
        self
    }

    /// Render `field` as `column`, which may be `table.column`.
    pub fn remap(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.remapping.insert(field.into(), column.into());
        self
    }

    fn resolved_dialect(&self) -> Dialect {
        self.dialect
            .unwrap_or_else(|| config::current().default_dialect())
    }

    fn resolved_arg_start(&self) -> usize {
        self.arg_start.unwrap_or(1).max(1)
    }
}

/// A bare statement whose namespace is a fixed set of column names.
#[derive(Debug, Clone)]
pub struct RawQuery {
    columns: Vec<String>,
    statement: SelectStatement,
}

impl RawQuery {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut statement = Query::select();
        statement.expr(Expr::cust("1"));
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            statement,
        }
    }

    fn render(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let (sql, values) = match dialect {
            Dialect::Postgres => self.statement.build(PostgresQueryBuilder),
            Dialect::MySql => self.statement.build(MysqlQueryBuilder),
            Dialect::Sqlite => self.statement.build(SqliteQueryBuilder),
        };
        (sql, values.0)
    }
}

/// Backend rendering unqualified (or dotted) column references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSql {
    dialect: Dialect,
}

impl RawSql {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl Backend for RawSql {
    type Query = RawQuery;
    type Expr = SimpleExpr;
    type Condition = SimpleExpr;

    fn namespace(&self, query: &RawQuery) -> Namespace<SimpleExpr> {
        query
            .columns
            .iter()
            .map(|name| (name.clone(), SimpleExpr::from(Expr::col(column_ref(name)))))
            .collect()
    }

    fn condition(
        &self,
        op: Operator,
        expr: &SimpleExpr,
        value: &FilterValue,
    ) -> Result<SimpleExpr> {
        predicate(self.dialect, op, expr.clone(), value)
    }

    fn add_condition(&self, query: &mut RawQuery, condition: SimpleExpr) {
        query.statement.and_where(condition);
    }

    fn add_ordering(
        &self,
        query: &mut RawQuery,
        expr: &SimpleExpr,
        direction: SortDirection,
        nulls: Option<NullsOrder>,
    ) {
        order_by(&mut query.statement, expr.clone(), direction, nulls);
    }
}

fn columns<'a>(fields: impl Iterator<Item = &'a str>, options: &CompileOptions) -> Vec<String> {
    fields
        .map(|field| options.remapping.get(field).map_or(field, String::as_str))
        .map(str::to_string)
        .collect()
}

fn apply_options(options: &CompileOptions) -> ApplyOptions<RawSql> {
    ApplyOptions::new().with_remapping(options.remapping.clone())
}

fn strip_clause(sql: &str, keyword: &str) -> Result<String> {
    let prefix = format!("SELECT 1 {keyword} ");
    sql.strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| Error::Compile(sql.to_string()))
}

/// Compile filters into a `WHERE` fragment; `None` when there are none.
pub fn compile_filters(
    filters: &FilterValues,
    options: &CompileOptions,
) -> Result<Option<CompiledStatement>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let dialect = options.resolved_dialect();
    let backend = RawSql::new(dialect);
    let query = RawQuery::new(columns(filters.fields(), options));
    let query = apply_filters(&backend, query, filters, &apply_options(options))?;

    let (sql, args) = query.render(dialect);
    let text = strip_clause(&sql, "WHERE")?;
    let compiled = CompiledStatement::new(
        text,
        args,
        options.resolved_arg_start(),
        dialect.is_positional(),
    )?;
    tracing::debug!(%dialect, nargs = compiled.nargs(), "compiled filter fragment");
    Ok(Some(compiled))
}

/// Compile sorting into an `ORDER BY` fragment; `None` when there is none.
pub fn compile_sorting(
    sorting: &SortValues,
    options: &CompileOptions,
) -> Result<Option<CompiledStatement>> {
    if sorting.is_empty() {
        return Ok(None);
    }

    let dialect = options.resolved_dialect();
    let backend = RawSql::new(dialect);
    let query = RawQuery::new(columns(sorting.iter().map(|s| s.field.as_str()), options));
    let query = apply_sorting(&backend, query, sorting, &apply_options(options))?;

    let (sql, args) = query.render(dialect);
    let text = strip_clause(&sql, "ORDER BY")?;
    let compiled = CompiledStatement::new(
        text,
        args,
        options.resolved_arg_start(),
        dialect.is_positional(),
    )?;
    tracing::debug!(%dialect, keys = sorting.len(), "compiled sorting fragment");
    Ok(Some(compiled))
}

/// Compile both; with a positional dialect the sorting fragment continues
/// numbering where the filter fragment ends.
pub fn compile_filters_and_sorting(
    filters: &FilterValues,
    sorting: &SortValues,
    options: &CompileOptions,
) -> Result<(Option<CompiledStatement>, Option<CompiledStatement>)> {
    let filters = compile_filters(filters, options)?;

    let sorting = match &filters {
        Some(compiled) if compiled.is_positional() => {
            compile_sorting(sorting, &options.clone().arg_start(compiled.end()))?
        }
        _ => compile_sorting(sorting, options)?,
    };

    Ok((filters, sorting))
}
