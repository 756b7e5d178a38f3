//! Strainer test utilities.
//!
//! Helpers shared by the integration tests: query-string encoding, sample
//! column declarations, and placeholder extraction from compiled SQL.

use std::sync::LazyLock;

use regex::Regex;

/// Encode `(key, value)` pairs as a query string, brackets included.
pub fn encode_query<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

/// Columns of a sample `users` table as `(name, type)`.
pub fn user_columns() -> Vec<(&'static str, &'static str)> {
    vec![
        ("id", "int"),
        ("name", "str"),
        ("email", "str?"),
        ("age", "int"),
        ("score", "float?"),
        ("active", "bool"),
        ("created_at", "datetime"),
        ("languages", "list[str]"),
    ]
}

/// Columns of a sample `posts` table as `(name, type)`.
pub fn post_columns() -> Vec<(&'static str, &'static str)> {
    vec![
        ("id", "int"),
        ("user_id", "int"),
        ("title", "str"),
        ("status", "enum[draft|published|archived]"),
        ("published_on", "date?"),
    ]
}

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex literal"));

/// Every `$n` placeholder index in `sql`, in order of appearance.
pub fn placeholders(sql: &str) -> Vec<usize> {
    PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn brackets_are_percent_encoded() {
        assert_eq!(encode_query(&[("age[gt]", "1")]), "age%5Bgt%5D=1");
        assert_eq!(encode_query(&[("sort", "+name")]), "sort=%2Bname");
    }

    #[test]
    fn placeholders_in_order() {
        assert_eq!(placeholders(r#""a" = $3 AND "b" IN ($4, $5)"#), vec![3, 4, 5]);
    }
}
