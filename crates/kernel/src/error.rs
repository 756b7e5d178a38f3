//! Error types.
//!
//! [`Error`] covers declaration-time and translation failures; these are
//! programmer errors and are never turned into HTTP responses.
//! [`ValidationErrors`] covers bad request input and renders as a 422.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::filter::Operator;

/// Declaration and translation errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Default sort field {field} is not in {allowed}")]
    InvalidDefaultSort { field: String, allowed: String },

    #[error("Duplicate operator {operator} for {field}")]
    DuplicateOperator { field: String, operator: Operator },

    #[error("Operator {operator} is not allowed for {field}")]
    OperatorNotAllowed { field: String, operator: Operator },

    #[error("Default operator {operator} of {field} is not one of its operators")]
    DefaultOperatorNotAllowed { field: String, operator: Operator },

    #[error("Unknown filter field {0}")]
    UnknownFilterField(String),

    #[error("Operator {0} is not implemented")]
    UnsupportedOperator(Operator),

    #[error("Unknown field {0}")]
    UnknownField(String),

    #[error("Unknown sorting direction {0}")]
    UnknownSortDirection(String),

    #[error("Unknown nulls policy {0}")]
    UnknownNullsPolicy(String),

    #[error("Unknown operator {0}")]
    UnknownOperator(String),

    #[error("Unknown field type {0}")]
    UnknownFieldType(String),

    #[error("Unknown SQL dialect {0}")]
    UnknownDialect(String),

    #[error("Operator {operator} expects {expected}, got {got}")]
    InvalidOperand {
        operator: Operator,
        expected: &'static str,
        got: &'static str,
    },

    #[error("filter hook failed for {field}")]
    Hook {
        field: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unexpected compiled statement: {0}")]
    Compile(String),

    #[error("placeholder numbering starting at {arg_start} overflows")]
    PlaceholderOverflow { arg_start: usize },
}

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One segment of a validation error location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocItem {
    Key(String),
    Index(usize),
}

impl From<&str> for LocItem {
    fn from(key: &str) -> Self {
        LocItem::Key(key.to_string())
    }
}

impl From<String> for LocItem {
    fn from(key: String) -> Self {
        LocItem::Key(key)
    }
}

impl From<usize> for LocItem {
    fn from(index: usize) -> Self {
        LocItem::Index(index)
    }
}

/// A single bad input value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Where the value came from, e.g. `["query", "age[in]", 1]`.
    pub loc: Vec<LocItem>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub input: String,
}

impl ValidationError {
    pub fn new(kind: &'static str, msg: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            loc: Vec::new(),
            msg: msg.into(),
            kind,
            input: input.into(),
        }
    }

    /// Append a location segment.
    pub fn at(mut self, item: impl Into<LocItem>) -> Self {
        self.loc.push(item.into());
        self
    }

    /// Prepend location segments.
    pub fn within<I>(mut self, prefix: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<LocItem>,
    {
        let mut loc: Vec<LocItem> = prefix.into_iter().map(Into::into).collect();
        loc.append(&mut self.loc);
        self.loc = loc;
        self
    }
}

/// Request input errors, collected across every parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[error("{} validation error(s)", .detail.len())]
pub struct ValidationErrors {
    pub detail: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.detail.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.detail.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detail.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.detail.iter()
    }

    /// `Ok(value)` if nothing was collected.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl Extend<ValidationError> for ValidationErrors {
    fn extend<I: IntoIterator<Item = ValidationError>>(&mut self, iter: I) {
        self.detail.extend(iter);
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self {
            detail: vec![error],
        }
    }
}

impl IntoResponse for ValidationErrors {
    fn into_response(self) -> Response {
        tracing::debug!(
            errors = self.detail.len(),
            "rejecting request with invalid query parameters"
        );
        (StatusCode::UNPROCESSABLE_ENTITY, Json(self)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_culprit() {
        let err = Error::DuplicateOperator {
            field: "age".into(),
            operator: Operator::Gt,
        };
        assert_eq!(err.to_string(), "Duplicate operator gt for age");
        assert_eq!(
            Error::UnsupportedOperator(Operator::Overlap).to_string(),
            "Operator overlap is not implemented"
        );
        assert_eq!(
            Error::UnknownSortDirection("sideways".into()).to_string(),
            "Unknown sorting direction sideways"
        );
    }

    #[test]
    fn location_is_prefixed() {
        let err = ValidationError::new("int_parsing", "bad", "x")
            .at(2_usize)
            .within(["query", "ids[in]"]);
        assert_eq!(
            err.loc,
            vec![
                LocItem::Key("query".into()),
                LocItem::Key("ids[in]".into()),
                LocItem::Index(2)
            ]
        );
    }

    #[test]
    fn serializes_like_a_detail_list() {
        let errors: ValidationErrors = ValidationError::new("int_parsing", "bad", "x")
            .within(["query", "age"])
            .into();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "detail": [{"loc": ["query", "age"], "msg": "bad", "type": "int_parsing", "input": "x"}]
            })
        );
    }

    #[test]
    fn renders_unprocessable_entity() {
        let errors: ValidationErrors = ValidationError::new("missing", "Field required", "").into();
        let response = errors.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
