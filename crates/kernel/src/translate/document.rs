//! Document-store backend producing Mongo-style JSON filters.
//!
//! Each condition is a single-field document such as
//! `{"age": {"$gt": 18}}`; [`DocumentQuery::to_filter`] conjoins them with
//! `$and`. Sort specs are ordered `(field, 1 | -1)` pairs. Document stores
//! order nulls themselves, so any nulls policy is ignored.

use serde_json::{Map, Number, Value as Json, json};

use super::{Backend, Namespace};
use crate::error::{Error, Result};
use crate::filter::{FilterValue, Operator};
use crate::sorting::{NullsOrder, SortDirection};

/// A find query over a collection with known field paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    fields: Vec<String>,
    conditions: Vec<Json>,
    sort: Vec<(String, i8)>,
}

impl DocumentQuery {
    /// A query whose namespace is exactly `fields`.
    pub fn for_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn field(mut self, path: impl Into<String>) -> Self {
        self.fields.push(path.into());
        self
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Conditions in the order they were added.
    pub fn conditions(&self) -> &[Json] {
        &self.conditions
    }

    pub fn sort_spec(&self) -> &[(String, i8)] {
        &self.sort
    }

    /// The sort spec as `[[field, 1|-1], ...]`.
    pub fn sort_document(&self) -> Json {
        Json::Array(
            self.sort
                .iter()
                .map(|(field, dir)| json!([field, dir]))
                .collect(),
        )
    }

    /// The combined filter document.
    pub fn to_filter(&self) -> Json {
        match self.conditions.as_slice() {
            [] => Json::Object(Map::new()),
            [single] => single.clone(),
            many => json!({ "$and": many }),
        }
    }
}

/// Backend for [`DocumentQuery`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Document;

impl Backend for Document {
    type Query = DocumentQuery;
    type Expr = String;
    type Condition = Json;

    fn namespace(&self, query: &DocumentQuery) -> Namespace<String> {
        query.fields.iter().map(|f| (f.clone(), f.clone())).collect()
    }

    fn condition(&self, op: Operator, path: &String, value: &FilterValue) -> Result<Json> {
        let clause = match op {
            Operator::Eq => json!({ "$eq": to_json(value) }),
            Operator::Ne => json!({ "$ne": to_json(value) }),
            Operator::Gt => json!({ "$gt": to_json(value) }),
            Operator::Ge => json!({ "$gte": to_json(value) }),
            Operator::Lt => json!({ "$lt": to_json(value) }),
            Operator::Le => json!({ "$lte": to_json(value) }),
            Operator::Like => regex_clause(op, value, false)?,
            Operator::NotLike => json!({ "$not": regex_clause(op, value, false)? }),
            Operator::Ilike => regex_clause(op, value, true)?,
            Operator::NotIlike => json!({ "$not": regex_clause(op, value, true)? }),
            Operator::In | Operator::Overlap => json!({ "$in": list(value) }),
            Operator::NotIn | Operator::NotOverlap => json!({ "$nin": list(value) }),
            Operator::Contains | Operator::NotContains => {
                return Ok(contains(op, path, value));
            }
            Operator::IsNull => match value.as_bool() {
                Some(true) => json!({ "$eq": null }),
                Some(false) => json!({ "$ne": null }),
                None => {
                    return Err(Error::InvalidOperand {
                        operator: op,
                        expected: "bool",
                        got: value.kind(),
                    });
                }
            },
        };
        Ok(on_path(path, clause))
    }

    fn add_condition(&self, query: &mut DocumentQuery, condition: Json) {
        query.conditions.push(condition);
    }

    fn add_ordering(
        &self,
        query: &mut DocumentQuery,
        path: &String,
        direction: SortDirection,
        _nulls: Option<NullsOrder>,
    ) {
        let dir = match direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        query.sort.push((path.clone(), dir));
    }
}

fn contains(op: Operator, path: &str, value: &FilterValue) -> Json {
    let items = list(value);
    let empty = items.as_array().is_some_and(Vec::is_empty);
    match (op, empty) {
        // Every array contains the empty set.
        (Operator::Contains, true) => Json::Object(Map::new()),
        (Operator::Contains, false) => on_path(path, json!({ "$all": items })),
        (_, true) => json!({ "$expr": false }),
        (_, false) => on_path(path, json!({ "$not": { "$all": items } })),
    }
}

fn on_path(path: &str, clause: Json) -> Json {
    let mut doc = Map::new();
    doc.insert(path.to_string(), clause);
    Json::Object(doc)
}

fn regex_clause(op: Operator, value: &FilterValue, insensitive: bool) -> Result<Json> {
    let pattern = value.as_str().ok_or(Error::InvalidOperand {
        operator: op,
        expected: "str",
        got: value.kind(),
    })?;
    let mut clause = json!({ "$regex": like_to_regex(pattern) });
    if insensitive {
        clause["$options"] = json!("i");
    }
    Ok(clause)
}

/// Translate a SQL LIKE pattern into an anchored regular expression.
///
/// `%` matches any run, `_` any single character, and a backslash makes the
/// next character literal.
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => match chars.next() {
                Some(next) => out.push_str(&regex::escape(next.encode_utf8(&mut [0; 4]))),
                None => out.push_str(r"\\"),
            },
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

fn list(value: &FilterValue) -> Json {
    Json::Array(value.as_items().iter().map(to_json).collect())
}

/// JSON form of a filter operand.
pub fn to_json(value: &FilterValue) -> Json {
    match value {
        FilterValue::Bool(b) => Json::Bool(*b),
        FilterValue::Int(i) => Json::Number((*i).into()),
        FilterValue::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
        FilterValue::List(items) => Json::Array(items.iter().map(to_json).collect()),
        FilterValue::Str(s) => Json::String(s.clone()),
        other => Json::String(other.to_string()),
    }
}
