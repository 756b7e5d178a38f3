//! Declared field types, decoded filter values and query-string decoding.
//!
//! Provides:
//! - FieldType: the declared type of a filterable attribute
//! - FilterValue: a decoded operand
//! - ParamType: the accepted type of one synthesized parameter

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use regex::Regex;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use uuid::Uuid;

use crate::error::{Error, LocItem, ValidationError};

/// Declared type of a filterable field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    Date,
    DateTime,
    Duration,
    Uuid,
    /// Closed set of string literals.
    Enum(Vec<String>),
    /// Nullable wrapper.
    Optional(Box<FieldType>),
    /// Homogeneous collection.
    List(Box<FieldType>),
}

impl FieldType {
    /// Wrap `inner` as nullable; already-nullable types are returned as is.
    pub fn optional(inner: FieldType) -> Self {
        match inner {
            FieldType::Optional(_) => inner,
            other => FieldType::Optional(Box::new(other)),
        }
    }

    /// Collection of `element`.
    pub fn list(element: FieldType) -> Self {
        FieldType::List(Box::new(element))
    }

    /// Enum over the given literals.
    pub fn enumeration<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum(literals.into_iter().map(Into::into).collect())
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }

    /// The type with any nullable wrapper removed.
    pub fn non_null(&self) -> &FieldType {
        match self {
            FieldType::Optional(inner) => inner,
            other => other,
        }
    }

    /// Whether this is a collection type (looking through nullability).
    pub fn is_sequence(&self) -> bool {
        matches!(self.non_null(), FieldType::List(_))
    }

    /// Element type of a collection.
    pub fn element(&self) -> Option<&FieldType> {
        match self.non_null() {
            FieldType::List(element) => Some(element),
            _ => None,
        }
    }

    /// Text types receive the pattern operators.
    pub fn is_textual(&self) -> bool {
        matches!(self.non_null(), FieldType::Str)
    }

    /// Numeric and temporal types receive the ordering operators.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self.non_null(),
            FieldType::Int
                | FieldType::Float
                | FieldType::Date
                | FieldType::DateTime
                | FieldType::Duration
        )
    }

    /// Decode one raw query-string value as this type.
    ///
    /// Collections are not decoded here; see [`ParamType::decode`].
    pub fn decode(&self, raw: &str) -> Result<FilterValue, ValidationError> {
        match self {
            FieldType::Optional(inner) => inner.decode(raw),
            FieldType::Bool => parse_bool(raw)
                .map(FilterValue::Bool)
                .ok_or_else(|| {
                    issue(
                        "bool_parsing",
                        "Input should be a valid boolean, unable to interpret input",
                        raw,
                    )
                }),
            FieldType::Int => raw.trim().parse::<i64>().map(FilterValue::Int).map_err(|_| {
                issue(
                    "int_parsing",
                    "Input should be a valid integer, unable to parse string as an integer",
                    raw,
                )
            }),
            FieldType::Float => raw
                .trim()
                .parse::<f64>()
                .map(FilterValue::Float)
                .map_err(|_| {
                    issue(
                        "float_parsing",
                        "Input should be a valid number, unable to parse string as a number",
                        raw,
                    )
                }),
            FieldType::Str => Ok(FilterValue::Str(raw.to_string())),
            FieldType::Date => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(FilterValue::Date)
                .map_err(|_| {
                    issue(
                        "date_parsing",
                        "Input should be a valid date in the format YYYY-MM-DD",
                        raw,
                    )
                }),
            FieldType::DateTime => parse_datetime(raw)
                .map(FilterValue::DateTime)
                .ok_or_else(|| issue("datetime_parsing", "Input should be a valid datetime", raw)),
            FieldType::Duration => parse_duration(raw)
                .map(FilterValue::Duration)
                .ok_or_else(|| {
                    issue("time_delta_parsing", "Input should be a valid timedelta", raw)
                }),
            FieldType::Uuid => Uuid::parse_str(raw.trim())
                .map(FilterValue::Uuid)
                .map_err(|_| issue("uuid_parsing", "Input should be a valid UUID", raw)),
            FieldType::Enum(literals) => {
                if literals.iter().any(|l| l == raw) {
                    Ok(FilterValue::Str(raw.to_string()))
                } else {
                    Err(issue(
                        "enum",
                        format!("Input should be {}", expected_literals(literals)),
                        raw,
                    ))
                }
            }
            FieldType::List(element) => ParamType::CsvList((**element).clone())
                .decode(&[raw])
                .map_err(|mut errors| errors.remove(0)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => f.write_str("bool"),
            FieldType::Int => f.write_str("int"),
            FieldType::Float => f.write_str("float"),
            FieldType::Str => f.write_str("str"),
            FieldType::Date => f.write_str("date"),
            FieldType::DateTime => f.write_str("datetime"),
            FieldType::Duration => f.write_str("duration"),
            FieldType::Uuid => f.write_str("uuid"),
            FieldType::Enum(literals) => write!(f, "enum[{}]", literals.join("|")),
            FieldType::Optional(inner) => write!(f, "{inner}?"),
            FieldType::List(element) => write!(f, "list[{element}]"),
        }
    }
}

impl FromStr for FieldType {
    type Err = Error;

    /// Parses the notation produced by `Display`: `int`, `str?`,
    /// `list[str]`, `enum[red|green]`, `list[int]?`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unknown = || Error::UnknownFieldType(s.to_string());

        if let Some(inner) = s.strip_suffix('?') {
            return inner.parse().map(FieldType::optional);
        }
        if let Some(inner) = s.strip_prefix("list[").and_then(|r| r.strip_suffix(']')) {
            return inner.parse().map(FieldType::list);
        }
        if let Some(inner) = s.strip_prefix("enum[").and_then(|r| r.strip_suffix(']')) {
            let literals: Vec<String> = inner
                .split('|')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if literals.is_empty() {
                return Err(unknown());
            }
            return Ok(FieldType::Enum(literals));
        }

        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(FieldType::Bool),
            "int" | "integer" => Ok(FieldType::Int),
            "float" | "number" => Ok(FieldType::Float),
            "str" | "string" | "text" => Ok(FieldType::Str),
            "date" => Ok(FieldType::Date),
            "datetime" | "timestamp" => Ok(FieldType::DateTime),
            "duration" | "timedelta" | "interval" => Ok(FieldType::Duration),
            "uuid" => Ok(FieldType::Uuid),
            _ => Err(unknown()),
        }
    }
}

/// A decoded filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Duration(TimeDelta),
    Uuid(Uuid),
    /// Operand of membership and collection operators.
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterValue::Bool(_) => "bool",
            FilterValue::Int(_) => "int",
            FilterValue::Float(_) => "float",
            FilterValue::Str(_) => "str",
            FilterValue::Date(_) => "date",
            FilterValue::DateTime(_) => "datetime",
            FilterValue::Duration(_) => "duration",
            FilterValue::Uuid(_) => "uuid",
            FilterValue::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FilterValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FilterValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FilterValue]> {
        match self {
            FilterValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Elements of a list operand, or the value itself as a one-element slice.
    pub fn as_items(&self) -> &[FilterValue] {
        match self {
            FilterValue::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FilterValue::Bool(b) => serializer.serialize_bool(*b),
            FilterValue::Int(i) => serializer.serialize_i64(*i),
            FilterValue::Float(x) => serializer.serialize_f64(*x),
            FilterValue::Str(s) => serializer.serialize_str(s),
            FilterValue::Date(d) => serializer.collect_str(d),
            FilterValue::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FilterValue::Duration(d) => serializer.collect_str(d),
            FilterValue::Uuid(u) => serializer.collect_str(u),
            FilterValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Bool(b) => write!(f, "{b}"),
            FilterValue::Int(i) => write!(f, "{i}"),
            FilterValue::Float(x) => write!(f, "{x}"),
            FilterValue::Str(s) => f.write_str(s),
            FilterValue::Date(d) => write!(f, "{d}"),
            FilterValue::DateTime(dt) => {
                f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FilterValue::Duration(d) => write!(f, "{d}"),
            FilterValue::Uuid(u) => write!(f, "{u}"),
            FilterValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

macro_rules! filter_value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(v: $ty) -> Self {
                    FilterValue::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

filter_value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int as i64,
    i16 => Int as i64,
    u32 => Int as i64,
    f64 => Float,
    f32 => Float as f64,
    String => Str,
    NaiveDate => Date,
    DateTime<Utc> => DateTime,
    TimeDelta => Duration,
    Uuid => Uuid,
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Str(v.to_string())
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(v: Vec<T>) -> Self {
        FilterValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Accepted type of one synthesized request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// One value of the given type.
    Single(FieldType),
    /// Comma-separated list of the given element type.
    CsvList(FieldType),
}

impl ParamType {
    /// Decode the raw values supplied for one parameter key.
    ///
    /// `raw` holds every occurrence of the key in request order. A single
    /// occurrence of a list parameter is split on `,`; several occurrences
    /// are taken element-wise. Element errors carry the element's index.
    pub fn decode(&self, raw: &[&str]) -> Result<FilterValue, Vec<ValidationError>> {
        match self {
            ParamType::Single(FieldType::List(element)) => {
                ParamType::CsvList((**element).clone()).decode(raw)
            }
            ParamType::Single(ty) => {
                let Some(last) = raw.last() else {
                    return Err(vec![missing()]);
                };
                ty.decode(last).map_err(|e| vec![e])
            }
            ParamType::CsvList(element) => {
                let items: Vec<&str> = match raw {
                    [] => return Err(vec![missing()]),
                    [single] => split_csv(single),
                    many => many.to_vec(),
                };

                let mut values = Vec::with_capacity(items.len());
                let mut errors = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    match element.decode(item) {
                        Ok(value) => values.push(value),
                        Err(e) => errors.push(e.at(LocItem::Index(index))),
                    }
                }

                if errors.is_empty() {
                    Ok(FilterValue::List(values))
                } else {
                    Err(errors)
                }
            }
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Single(ty) => write!(f, "{ty}"),
            ParamType::CsvList(ty) => write!(f, "csv[{ty}]"),
        }
    }
}

/// Split one comma-joined query value into its elements.
pub fn split_csv(raw: &str) -> Vec<&str> {
    raw.split(',').collect()
}

/// Human list of accepted literals: `'a', 'b' or 'c'`.
pub(crate) fn expected_literals<S: AsRef<str>>(literals: &[S]) -> String {
    let quoted: Vec<String> = literals.iter().map(|l| format!("'{}'", l.as_ref())).collect();
    match quoted.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
    }
}

fn issue(kind: &'static str, msg: impl Into<String>, input: &str) -> ValidationError {
    ValidationError::new(kind, msg, input)
}

fn missing() -> ValidationError {
    ValidationError::new("missing", "Field required", "")
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// ISO 8601 duration such as `P1DT2H30M` or `-PT0.5S`.
#[allow(clippy::expect_used)]
static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sign>[-+])?P(?:(?P<w>\d+(?:\.\d+)?)W)?(?:(?P<d>\d+(?:\.\d+)?)D)?(?:T(?:(?P<h>\d+(?:\.\d+)?)H)?(?:(?P<m>\d+(?:\.\d+)?)M)?(?:(?P<s>\d+(?:\.\d+)?)S)?)?$",
    )
    .expect("valid regex literal")
});

/// Clock notation such as `01:30:00`, `-00:00:05.5` or `2 days, 04:00:00`.
#[allow(clippy::expect_used)]
static CLOCK_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sign>-)?(?:(?P<d>\d+) days?,? )?(?P<h>\d{1,2}):(?P<m>\d{2}):(?P<s>\d{2}(?:\.\d+)?)$",
    )
    .expect("valid regex literal")
});

fn parse_duration(raw: &str) -> Option<TimeDelta> {
    let raw = raw.trim();

    if let Ok(secs) = raw.parse::<f64>() {
        return seconds_to_delta(secs);
    }

    let component = |caps: &regex::Captures<'_>, name: &str| -> f64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    if let Some(caps) = ISO_DURATION.captures(raw) {
        let has_component = ["w", "d", "h", "m", "s"]
            .iter()
            .any(|name| caps.name(name).is_some());
        if !has_component {
            return None;
        }
        let secs = component(&caps, "w") * 604_800.0
            + component(&caps, "d") * 86_400.0
            + component(&caps, "h") * 3_600.0
            + component(&caps, "m") * 60.0
            + component(&caps, "s");
        let sign = if caps.name("sign").is_some_and(|m| m.as_str() == "-") {
            -1.0
        } else {
            1.0
        };
        return seconds_to_delta(sign * secs);
    }

    if let Some(caps) = CLOCK_DURATION.captures(raw) {
        let secs = component(&caps, "d") * 86_400.0
            + component(&caps, "h") * 3_600.0
            + component(&caps, "m") * 60.0
            + component(&caps, "s");
        let sign = if caps.name("sign").is_some() { -1.0 } else { 1.0 };
        return seconds_to_delta(sign * secs);
    }

    None
}

fn seconds_to_delta(secs: f64) -> Option<TimeDelta> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    Some(TimeDelta::microseconds(micros as i64))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn field_type_notation_round_trips() {
        for notation in [
            "bool",
            "int",
            "str?",
            "list[str]",
            "list[int]?",
            "enum[red|green]",
            "duration",
        ] {
            let ty: FieldType = notation.parse().unwrap();
            assert_eq!(ty.to_string(), notation);
        }
        assert!("money".parse::<FieldType>().is_err());
        assert!("enum[]".parse::<FieldType>().is_err());
    }

    #[test]
    fn sequence_detection_looks_through_optional() {
        let ty = FieldType::optional(FieldType::list(FieldType::Int));
        assert!(ty.is_sequence());
        assert_eq!(ty.element(), Some(&FieldType::Int));
        assert!(!FieldType::Str.is_sequence());
    }

    #[test]
    fn bool_accepts_lax_spellings() {
        for raw in ["true", "True", "1", "yes", "on", "t", "Y"] {
            assert_eq!(FieldType::Bool.decode(raw).unwrap(), FilterValue::Bool(true));
        }
        for raw in ["false", "0", "no", "off", "F"] {
            assert_eq!(FieldType::Bool.decode(raw).unwrap(), FilterValue::Bool(false));
        }
        let err = FieldType::Bool.decode("maybe").unwrap_err();
        assert_eq!(err.kind, "bool_parsing");
    }

    #[test]
    fn int_rejects_text() {
        assert_eq!(FieldType::Int.decode("42").unwrap(), FilterValue::Int(42));
        let err = FieldType::Int.decode("x").unwrap_err();
        assert_eq!(err.kind, "int_parsing");
        assert_eq!(err.input, "x");
    }

    #[test]
    fn datetime_accepts_several_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        for raw in [
            "2024-03-01T12:00:00Z",
            "2024-03-01T14:00:00+02:00",
            "2024-03-01T12:00:00",
            "2024-03-01 12:00:00",
        ] {
            assert_eq!(
                FieldType::DateTime.decode(raw).unwrap(),
                FilterValue::DateTime(expected),
                "{raw}"
            );
        }
        assert!(FieldType::DateTime.decode("yesterday").is_err());
    }

    #[test]
    fn duration_accepts_seconds_iso_and_clock() {
        let hour = FilterValue::Duration(TimeDelta::hours(1));
        assert_eq!(FieldType::Duration.decode("3600").unwrap(), hour);
        assert_eq!(FieldType::Duration.decode("PT1H").unwrap(), hour);
        assert_eq!(FieldType::Duration.decode("01:00:00").unwrap(), hour);
        assert_eq!(
            FieldType::Duration.decode("P1DT30M").unwrap(),
            FilterValue::Duration(TimeDelta::days(1) + TimeDelta::minutes(30))
        );
        assert!(FieldType::Duration.decode("P").is_err());
        assert!(FieldType::Duration.decode("soon").is_err());
    }

    #[test]
    fn enum_lists_accepted_literals() {
        let ty = FieldType::enumeration(["red", "green", "blue"]);
        assert_eq!(ty.decode("red").unwrap(), FilterValue::Str("red".into()));
        let err = ty.decode("pink").unwrap_err();
        assert_eq!(err.msg, "Input should be 'red', 'green' or 'blue'");
    }

    #[test]
    fn csv_list_splits_single_value() {
        let ty = ParamType::CsvList(FieldType::Int);
        assert_eq!(
            ty.decode(&["1,2,3"]).unwrap(),
            FilterValue::from(vec![1_i64, 2, 3])
        );
    }

    #[test]
    fn csv_list_takes_repeated_values_element_wise() {
        let ty = ParamType::CsvList(FieldType::Str);
        assert_eq!(
            ty.decode(&["a,b", "c"]).unwrap(),
            FilterValue::from(vec!["a,b", "c"])
        );
    }

    #[test]
    fn csv_list_reports_element_index() {
        let ty = ParamType::CsvList(FieldType::Int);
        let errors = ty.decode(&["1,x,3"]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].loc, vec![LocItem::Index(1)]);
        assert_eq!(errors[0].input, "x");
    }

    #[test]
    fn single_takes_last_occurrence() {
        let ty = ParamType::Single(FieldType::Int);
        assert_eq!(ty.decode(&["1", "2"]).unwrap(), FilterValue::Int(2));
    }

    #[test]
    fn filter_value_serializes_plainly() {
        let value = FilterValue::List(vec![
            FilterValue::Int(1),
            FilterValue::Str("a".into()),
            FilterValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
        ]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!([1, "a", "2024-01-02"])
        );
    }

    #[test]
    fn expected_literals_formatting() {
        assert_eq!(expected_literals(&["a"]), "'a'");
        assert_eq!(expected_literals(&["a", "b"]), "'a' or 'b'");
        assert_eq!(expected_literals::<&str>(&[]), "");
    }
}
