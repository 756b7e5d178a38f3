//! Relational backend on top of SeaQuery.
//!
//! A [`Select`] wraps a [`SelectStatement`] together with the tables it
//! reads, so the namespace can be reflected from the query itself. Every
//! column is reachable as `col`, `table.col`, and `singular.col` where
//! `singular` is the table name without a trailing `s`; the first table
//! added wins on bare-name clashes.

use sea_query::extension::postgres::PgBinOper;
use sea_query::{
    Alias, ArrayType, Asterisk, BinOper, ColumnRef, Expr, ExprTrait, Func, IntoColumnRef,
    JoinType, MysqlQueryBuilder, NullOrdering, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr, SqliteQueryBuilder, Value, Values,
};

use super::{Backend, Dialect, Namespace};
use crate::error::{Error, Result};
use crate::filter::{FilterValue, Operator};
use crate::sorting::{NullsOrder, SortDirection};

/// A table and the columns it exposes for filtering and sorting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
}

impl Table {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `"table"."column"`.
    pub fn column(&self, column: &str) -> SimpleExpr {
        column_expr(&self.name, column)
    }

    fn singular(&self) -> Option<&str> {
        self.name.strip_suffix('s').filter(|s| !s.is_empty())
    }
}

pub(crate) fn column_expr(table: &str, column: &str) -> SimpleExpr {
    Expr::col((Alias::new(table), Alias::new(column))).into()
}

/// A `SELECT` plus the tables it references.
#[derive(Debug, Clone)]
pub struct Select {
    tables: Vec<Table>,
    statement: SelectStatement,
}

impl Select {
    /// `SELECT "table".* FROM "table"`.
    pub fn from(table: Table) -> Self {
        let mut statement = Query::select();
        statement
            .column((Alias::new(table.name()), Asterisk))
            .from(Alias::new(table.name()));
        Self {
            tables: vec![table],
            statement,
        }
    }

    /// Wrap an existing statement; `tables` only feed the namespace.
    pub fn with_statement(statement: SelectStatement, tables: Vec<Table>) -> Self {
        Self { tables, statement }
    }

    /// `INNER JOIN table ON left = right`, both sides given as `table.column`.
    pub fn inner_join(self, table: Table, left: &str, right: &str) -> Self {
        self.join(JoinType::InnerJoin, table, left, right)
    }

    /// `LEFT JOIN table ON left = right`, both sides given as `table.column`.
    pub fn left_join(self, table: Table, left: &str, right: &str) -> Self {
        self.join(JoinType::LeftJoin, table, left, right)
    }

    fn join(mut self, kind: JoinType, table: Table, left: &str, right: &str) -> Self {
        let on = Expr::col(column_ref(left)).equals(column_ref(right));
        self.statement.join(kind, Alias::new(table.name()), on);
        self.tables.push(table);
        self
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn statement(&self) -> &SelectStatement {
        &self.statement
    }

    pub fn statement_mut(&mut self) -> &mut SelectStatement {
        &mut self.statement
    }

    pub fn into_statement(self) -> SelectStatement {
        self.statement
    }

    /// Render with values inlined.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match dialect {
            Dialect::Postgres => self.statement.to_string(PostgresQueryBuilder),
            Dialect::MySql => self.statement.to_string(MysqlQueryBuilder),
            Dialect::Sqlite => self.statement.to_string(SqliteQueryBuilder),
        }
    }

    /// Render with placeholders and the bound values.
    pub fn build(&self, dialect: Dialect) -> (String, Values) {
        match dialect {
            Dialect::Postgres => self.statement.build(PostgresQueryBuilder),
            Dialect::MySql => self.statement.build(MysqlQueryBuilder),
            Dialect::Sqlite => self.statement.build(SqliteQueryBuilder),
        }
    }
}

/// `name` or `table.name` as a column reference.
pub(crate) fn column_ref(name: &str) -> ColumnRef {
    match name.split_once('.') {
        Some((table, column)) => (Alias::new(table), Alias::new(column)).into_column_ref(),
        None => Alias::new(name).into_column_ref(),
    }
}

/// SeaQuery backend for one SQL dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relational {
    dialect: Dialect,
}

impl Relational {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn postgres() -> Self {
        Self::new(Dialect::Postgres)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl Backend for Relational {
    type Query = Select;
    type Expr = SimpleExpr;
    type Condition = SimpleExpr;

    fn namespace(&self, query: &Select) -> Namespace<SimpleExpr> {
        table_namespace(query.tables())
    }

    fn condition(
        &self,
        op: Operator,
        expr: &SimpleExpr,
        value: &FilterValue,
    ) -> Result<SimpleExpr> {
        predicate(self.dialect, op, expr.clone(), value)
    }

    fn add_condition(&self, query: &mut Select, condition: SimpleExpr) {
        query.statement.and_where(condition);
    }

    fn add_ordering(
        &self,
        query: &mut Select,
        expr: &SimpleExpr,
        direction: SortDirection,
        nulls: Option<NullsOrder>,
    ) {
        order_by(&mut query.statement, expr.clone(), direction, nulls);
    }
}

/// Namespace for `tables`, earlier tables shadowing later ones.
pub fn table_namespace(tables: &[Table]) -> Namespace<SimpleExpr> {
    let mut namespace = Namespace::new();
    for table in tables.iter().rev() {
        for column in table.columns() {
            let expr = table.column(column);
            namespace.insert(column.clone(), expr.clone());
            namespace.insert(format!("{}.{column}", table.name()), expr.clone());
            if let Some(singular) = table.singular() {
                namespace.insert(format!("{singular}.{column}"), expr);
            }
        }
    }
    namespace
}

pub(crate) fn order_by(
    statement: &mut SelectStatement,
    expr: SimpleExpr,
    direction: SortDirection,
    nulls: Option<NullsOrder>,
) {
    let order = match direction {
        SortDirection::Asc => Order::Asc,
        SortDirection::Desc => Order::Desc,
    };
    match nulls {
        Some(NullsOrder::First) => {
            statement.order_by_expr_with_nulls(expr, order, NullOrdering::First);
        }
        Some(NullsOrder::Last) => {
            statement.order_by_expr_with_nulls(expr, order, NullOrdering::Last);
        }
        None => {
            statement.order_by_expr(expr, order);
        }
    }
}

/// Build `expr <op> value` for `dialect`.
pub(crate) fn predicate(
    dialect: Dialect,
    op: Operator,
    expr: SimpleExpr,
    value: &FilterValue,
) -> Result<SimpleExpr> {
    let condition = match op {
        Operator::Eq => expr.eq(operand(dialect, op, value)?),
        Operator::Ne => expr.ne(operand(dialect, op, value)?),
        Operator::Gt => expr.gt(scalar(op, value)?),
        Operator::Ge => expr.gte(scalar(op, value)?),
        Operator::Lt => expr.lt(scalar(op, value)?),
        Operator::Le => expr.lte(scalar(op, value)?),
        Operator::Like => expr.like(text(op, value)?),
        Operator::NotLike => expr.not_like(text(op, value)?),
        Operator::Ilike => ilike(dialect, expr, text(op, value)?),
        Operator::NotIlike => ilike(dialect, expr, text(op, value)?).not(),
        Operator::In => expr.is_in(scalars(op, value)?),
        Operator::NotIn => expr.is_not_in(scalars(op, value)?),
        Operator::IsNull => match value.as_bool() {
            Some(true) => expr.is_null(),
            Some(false) => expr.is_not_null(),
            None => return Err(invalid(op, "bool", value)),
        },
        Operator::Overlap | Operator::NotOverlap | Operator::Contains | Operator::NotContains => {
            if dialect != Dialect::Postgres {
                return Err(Error::UnsupportedOperator(op));
            }
            array_predicate(op, expr, value)?
        }
    };
    Ok(condition)
}

fn ilike(dialect: Dialect, expr: SimpleExpr, pattern: &str) -> SimpleExpr {
    match dialect {
        Dialect::Postgres => expr.binary(
            BinOper::PgOperator(PgBinOper::ILike),
            SimpleExpr::Value(pattern.into()),
        ),
        Dialect::MySql | Dialect::Sqlite => {
            SimpleExpr::from(Func::lower(expr)).like(pattern.to_lowercase())
        }
    }
}

fn array_predicate(op: Operator, expr: SimpleExpr, value: &FilterValue) -> Result<SimpleExpr> {
    // An empty array has no element type, so empty operands are folded to constants.
    if value.as_items().is_empty() {
        let always = matches!(op, Operator::NotOverlap | Operator::Contains);
        return Ok(Expr::cust(if always { "TRUE" } else { "FALSE" }));
    }
    let array = array_value(op, value)?;
    let condition = match op {
        Operator::Overlap => expr.binary(BinOper::PgOperator(PgBinOper::Overlap), array),
        Operator::NotOverlap => expr
            .binary(BinOper::PgOperator(PgBinOper::Overlap), array)
            .not(),
        Operator::Contains => expr.binary(BinOper::PgOperator(PgBinOper::Contains), array),
        _ => expr
            .binary(BinOper::PgOperator(PgBinOper::Contains), array)
            .not(),
    };
    Ok(condition)
}

/// A non-empty list as one bound Postgres array.
fn array_value(op: Operator, value: &FilterValue) -> Result<SimpleExpr> {
    let ty = value
        .as_items()
        .first()
        .and_then(array_type)
        .ok_or_else(|| invalid(op, "non-empty list", value))?;
    let items = scalars(op, value)?;
    Ok(SimpleExpr::Value(Value::Array(ty, Some(Box::new(items)))))
}

fn array_type(item: &FilterValue) -> Option<ArrayType> {
    let ty = match item {
        FilterValue::Bool(_) => ArrayType::Bool,
        FilterValue::Int(_) => ArrayType::BigInt,
        FilterValue::Float(_) => ArrayType::Double,
        FilterValue::Str(_) | FilterValue::Duration(_) => ArrayType::String,
        FilterValue::Date(_) => ArrayType::ChronoDate,
        FilterValue::DateTime(_) => ArrayType::ChronoDateTimeUtc,
        FilterValue::Uuid(_) => ArrayType::Uuid,
        FilterValue::List(_) => return None,
    };
    Some(ty)
}

fn operand(dialect: Dialect, op: Operator, value: &FilterValue) -> Result<SimpleExpr> {
    match value {
        FilterValue::List(items) if items.is_empty() => Err(invalid(op, "non-empty list", value)),
        FilterValue::List(_) if dialect != Dialect::Postgres => Err(Error::UnsupportedOperator(op)),
        FilterValue::List(_) => array_value(op, value),
        other => Ok(SimpleExpr::Value(to_value(other)?)),
    }
}

fn scalar(op: Operator, value: &FilterValue) -> Result<Value> {
    match value {
        FilterValue::List(_) => Err(invalid(op, "scalar", value)),
        other => to_value(other),
    }
}

fn scalars(op: Operator, value: &FilterValue) -> Result<Vec<Value>> {
    value.as_items().iter().map(|item| scalar(op, item)).collect()
}

fn text(op: Operator, value: &FilterValue) -> Result<&str> {
    value.as_str().ok_or_else(|| invalid(op, "str", value))
}

fn invalid(operator: Operator, expected: &'static str, value: &FilterValue) -> Error {
    Error::InvalidOperand {
        operator,
        expected,
        got: value.kind(),
    }
}

/// Convert a scalar operand into a bind value.
pub fn to_value(value: &FilterValue) -> Result<Value> {
    let value = match value {
        FilterValue::Bool(b) => Value::from(*b),
        FilterValue::Int(i) => Value::from(*i),
        FilterValue::Float(x) => Value::from(*x),
        FilterValue::Str(s) => Value::from(s.clone()),
        FilterValue::Date(d) => Value::from(*d),
        FilterValue::DateTime(dt) => Value::from(*dt),
        FilterValue::Duration(d) => Value::from(d.to_string()),
        FilterValue::Uuid(u) => Value::from(*u),
        FilterValue::List(_) => {
            return Err(Error::InvalidOperand {
                operator: Operator::Eq,
                expected: "scalar",
                got: "list",
            });
        }
    };
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::filter::FilterValues;
    use crate::sorting::{NullsPolicy, SortValue, SortValues};
    use crate::translate::{ApplyOptions, apply_filters, apply_sorting};

    fn users() -> Table {
        Table::new("users", ["id", "name", "age", "tags"])
    }

    fn filtered(backend: Relational, field: &str, op: Operator, value: FilterValue) -> String {
        let mut values = FilterValues::new();
        values.insert(field, op, value);
        let select = apply_filters(&backend, Select::from(users()), &values, &ApplyOptions::new())
            .unwrap();
        select.to_sql(backend.dialect())
    }

    #[test]
    fn namespace_has_bare_qualified_and_singular_names() {
        let ns = table_namespace(&[users()]);
        assert!(ns.contains("age"));
        assert!(ns.contains("users.age"));
        assert!(ns.contains("user.age"));
        assert_eq!(ns.len(), 12);
    }

    #[test]
    fn first_table_wins_bare_names() {
        let select = Select::from(users()).inner_join(
            Table::new("posts", ["id", "title"]),
            "users.id",
            "posts.user_id",
        );
        let ns = Relational::postgres().namespace(&select);
        let sql = Query::select()
            .expr(ns.get("id").unwrap().clone())
            .to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""users"."id""#), "{sql}");
        assert!(ns.contains("post.title"));
    }

    #[test]
    fn join_renders() {
        let sql = Select::from(users())
            .left_join(Table::new("posts", ["id"]), "users.id", "posts.user_id")
            .to_sql(Dialect::Postgres);
        assert!(sql.contains("LEFT JOIN"), "{sql}");
        assert!(sql.contains(r#""posts"."user_id""#), "{sql}");
    }

    #[test]
    fn comparison_predicates() {
        let sql = filtered(Relational::postgres(), "age", Operator::Ge, 18_i64.into());
        assert!(sql.contains(r#""users"."age" >= 18"#), "{sql}");

        let sql = filtered(Relational::postgres(), "name", Operator::Ne, "bob".into());
        assert!(sql.contains(r#""users"."name" <> 'bob'"#), "{sql}");
    }

    #[test]
    fn membership_predicates() {
        let sql = filtered(
            Relational::postgres(),
            "id",
            Operator::In,
            vec![1_i64, 2].into(),
        );
        assert!(sql.contains(r#""users"."id" IN (1, 2)"#), "{sql}");

        let sql = filtered(
            Relational::postgres(),
            "id",
            Operator::NotIn,
            vec![3_i64].into(),
        );
        assert!(sql.contains("NOT IN (3)"), "{sql}");
    }

    #[test]
    fn is_null_follows_the_flag() {
        let sql = filtered(Relational::postgres(), "age", Operator::IsNull, true.into());
        assert!(sql.contains("IS NULL"), "{sql}");
        let sql = filtered(Relational::postgres(), "age", Operator::IsNull, false.into());
        assert!(sql.contains("IS NOT NULL"), "{sql}");
    }

    #[test]
    fn ilike_is_native_on_postgres() {
        let sql = filtered(Relational::postgres(), "name", Operator::Ilike, "Jo%".into());
        assert!(sql.contains("ILIKE 'Jo%'"), "{sql}");
    }

    #[test]
    fn ilike_lowers_both_sides_elsewhere() {
        let backend = Relational::new(Dialect::Sqlite);
        let sql = filtered(backend, "name", Operator::Ilike, "Jo%".into());
        assert!(sql.to_uppercase().contains("LOWER("), "{sql}");
        assert!(sql.contains("LIKE 'jo%'"), "{sql}");
    }

    #[test]
    fn array_operators_on_postgres() {
        let sql = filtered(
            Relational::postgres(),
            "tags",
            Operator::Overlap,
            vec!["a", "b"].into(),
        );
        assert!(sql.contains("&&"), "{sql}");
        assert!(sql.contains("ARRAY ['a','b']"), "{sql}");

        let sql = filtered(
            Relational::postgres(),
            "tags",
            Operator::NotContains,
            vec!["a"].into(),
        );
        assert!(sql.contains("@>"), "{sql}");
        assert!(sql.contains("NOT"), "{sql}");
    }

    #[test]
    fn empty_array_operands_fold_to_constants() {
        let empty = FilterValue::List(Vec::new());
        let sql = filtered(Relational::postgres(), "tags", Operator::Overlap, empty.clone());
        assert!(sql.contains("FALSE"), "{sql}");
        let sql = filtered(Relational::postgres(), "tags", Operator::Contains, empty);
        assert!(sql.contains("TRUE"), "{sql}");
    }

    #[test]
    fn array_operands_bind_after_scalars() {
        let mut values = FilterValues::new();
        values.insert("name", Operator::Eq, "ann");
        values.insert("tags", Operator::Overlap, vec!["a", "b"]);
        values.insert("age", Operator::Gt, 18_i64);
        let select = apply_filters(
            &Relational::postgres(),
            Select::from(users()),
            &values,
            &ApplyOptions::new(),
        )
        .unwrap();

        let (sql, args) = select.build(Dialect::Postgres);
        assert!(sql.contains(r#""users"."name" = $1"#), "{sql}");
        assert!(sql.contains(r#""users"."tags" && $2"#), "{sql}");
        assert!(sql.contains(r#""users"."age" > $3"#), "{sql}");
        assert_eq!(args.0.len(), 3);
        assert_eq!(
            args.0[1],
            Value::Array(ArrayType::String, Some(Box::new(vec!["a".into(), "b".into()])))
        );
    }

    #[test]
    fn is_null_on_optional_list_column() {
        let sql = filtered(Relational::postgres(), "tags", Operator::IsNull, true.into());
        assert!(sql.contains(r#""users"."tags" IS NULL"#), "{sql}");
    }

    #[test]
    fn list_equality_needs_postgres() {
        let sql = filtered(Relational::postgres(), "tags", Operator::Eq, vec!["a"].into());
        assert!(sql.contains(r#""users"."tags" = ARRAY ['a']"#), "{sql}");

        let err = predicate(
            Dialect::Sqlite,
            Operator::Eq,
            column_expr("users", "tags"),
            &FilterValue::from(vec!["a"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator(Operator::Eq)));
    }

    #[test]
    fn array_operators_need_postgres() {
        let mut values = FilterValues::new();
        values.insert("tags", Operator::Overlap, vec!["a"]);
        let err = apply_filters(
            &Relational::new(Dialect::MySql),
            Select::from(users()),
            &values,
            &ApplyOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator(Operator::Overlap)));
    }

    #[test]
    fn pattern_operand_must_be_text() {
        let err = predicate(
            Dialect::Postgres,
            Operator::Like,
            column_expr("users", "age"),
            &FilterValue::Int(1),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Operator like expects str, got int");
    }

    #[test]
    fn build_keeps_placeholders() {
        let mut values = FilterValues::new();
        values.insert("age", Operator::Gt, 18_i64);
        values.insert("name", Operator::Eq, "ann");
        let select = apply_filters(
            &Relational::postgres(),
            Select::from(users()),
            &values,
            &ApplyOptions::new(),
        )
        .unwrap();
        let (sql, args) = select.build(Dialect::Postgres);
        assert!(sql.contains("$1") && sql.contains("$2"), "{sql}");
        assert_eq!(args.0.len(), 2);
    }

    #[test]
    fn ordering_with_nulls() {
        let sorting = SortValues::new(vec![
            SortValue::new("age", SortDirection::Desc).with_nulls(NullsPolicy::Bigger),
            SortValue::new("name", SortDirection::Asc),
        ]);
        let select = apply_sorting(
            &Relational::postgres(),
            Select::from(users()),
            &sorting,
            &ApplyOptions::new(),
        )
        .unwrap();
        let sql = select.to_sql(Dialect::Postgres);
        assert!(
            sql.contains(r#"ORDER BY "users"."age" DESC NULLS FIRST, "users"."name" ASC"#),
            "{sql}"
        );
    }
}
