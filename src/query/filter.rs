//! Store-agnostic predicates over resource properties.
//!
//! A [`Filter`] is a `(path, operator, value)` triple. Query builders translate lists of filters
//! into backend specific fragments (see [`super::sparql`] and [`super::elastic`]).

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::StoreError;

/// Marker suffix turning a string filter value into a typed datetime.
pub const DATETIME_MARKER: &str = "^^xsd:dateTime";

/// Comparison operators supported by the query builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl FilterOperator {
    pub fn sparql_symbol(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::NotEqual => "!=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterOrEqual => ">=",
        }
    }

    /// Elasticsearch `range` keyword. Only range operators have one.
    pub fn elastic_keyword(&self) -> Option<&'static str> {
        match self {
            FilterOperator::LessThan => Some("lt"),
            FilterOperator::LessOrEqual => Some("lte"),
            FilterOperator::GreaterThan => Some("gt"),
            FilterOperator::GreaterOrEqual => Some("gte"),
            FilterOperator::Equal | FilterOperator::NotEqual => None,
        }
    }

    pub fn is_range(&self) -> bool {
        self.elastic_keyword().is_some()
    }

    /// The dunder name used by mapping-based filter descriptions (`__eq__`, `__lt__`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "__eq__",
            FilterOperator::NotEqual => "__ne__",
            FilterOperator::LessThan => "__lt__",
            FilterOperator::LessOrEqual => "__le__",
            FilterOperator::GreaterThan => "__gt__",
            FilterOperator::GreaterOrEqual => "__ge__",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterOperator {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "__eq__" | "=" | "==" => Ok(FilterOperator::Equal),
            "__ne__" | "!=" => Ok(FilterOperator::NotEqual),
            "__lt__" | "<" => Ok(FilterOperator::LessThan),
            "__le__" | "<=" => Ok(FilterOperator::LessOrEqual),
            "__gt__" | ">" => Ok(FilterOperator::GreaterThan),
            "__ge__" | ">=" => Ok(FilterOperator::GreaterOrEqual),
            other => Err(StoreError::Validation(format!(
                "unknown filter operator '{other}'"
            ))),
        }
    }
}

/// How a filter value is rendered by the query builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCategory {
    DateTime,
    Number,
    Boolean,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    /// A plain string. May still name an IRI or a context term.
    Literal(String),
    Number(Number),
    Boolean(bool),
    /// An ISO-8601 timestamp without the `^^xsd:dateTime` marker.
    DateTime(String),
    /// An embedding, matched by similarity rather than equality.
    Vector(Vec<f64>),
}

impl FilterValue {
    /// Parse a string value. Only an explicit [`DATETIME_MARKER`] makes a datetime; numeric
    /// looking strings such as `"2022"` stay literal.
    pub fn parse(s: &str) -> FilterValue {
        match s.strip_suffix(DATETIME_MARKER) {
            Some(stamp) => FilterValue::DateTime(stamp.to_string()),
            None => FilterValue::Literal(s.to_string()),
        }
    }

    pub fn category(&self) -> DataCategory {
        match self {
            FilterValue::DateTime(_) => DataCategory::DateTime,
            FilterValue::Number(_) | FilterValue::Vector(_) => DataCategory::Number,
            FilterValue::Boolean(_) => DataCategory::Boolean,
            FilterValue::Literal(_) => DataCategory::Literal,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Literal(s) | FilterValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    /// The JSON form used by document oriented backends.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Literal(s) | FilterValue::DateTime(s) => Value::String(s.clone()),
            FilterValue::Number(n) => Value::Number(n.clone()),
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::Vector(v) => Value::Array(
                v.iter()
                    .filter_map(|x| Number::from_f64(*x).map(Value::Number))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON leaf. Arrays are accepted only when every element is a number.
    pub fn from_json(value: &Value) -> Result<FilterValue, StoreError> {
        match value {
            Value::String(s) => Ok(FilterValue::parse(s)),
            Value::Number(n) => Ok(FilterValue::Number(n.clone())),
            Value::Bool(b) => Ok(FilterValue::Boolean(*b)),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_f64().ok_or_else(|| {
                        StoreError::Validation(format!(
                            "only numeric arrays can be used as filter values, got {value}"
                        ))
                    })
                })
                .collect::<Result<Vec<f64>, StoreError>>()
                .map(FilterValue::Vector),
            Value::Null | Value::Object(_) => Err(StoreError::Validation(format!(
                "unsupported filter value {value}"
            ))),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::parse(s)
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::parse(&s)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Boolean(b)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Number(Number::from(n))
    }
}

impl From<u64> for FilterValue {
    fn from(n: u64) -> Self {
        FilterValue::Number(Number::from(n))
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        FilterValue::Number(Number::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        match Number::from_f64(n) {
            Some(num) => FilterValue::Number(num),
            None => FilterValue::Literal(n.to_string()),
        }
    }
}

impl From<Vec<f64>> for FilterValue {
    fn from(v: Vec<f64>) -> Self {
        FilterValue::Vector(v)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(stamp: DateTime<Utc>) -> Self {
        FilterValue::DateTime(stamp.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Literal(s) => write!(f, "{s}"),
            FilterValue::DateTime(s) => write!(f, "{s}{DATETIME_MARKER}"),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Boolean(b) => write!(f, "{b}"),
            FilterValue::Vector(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub path: Vec<String>,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new<P, S, V>(path: P, operator: FilterOperator, value: V) -> Filter
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        V: Into<FilterValue>,
    {
        Filter {
            path: path.into_iter().map(Into::into).collect(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq<P, S, V>(path: P, value: V) -> Filter
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        V: Into<FilterValue>,
    {
        Filter::new(path, FilterOperator::Equal, value)
    }

    /// Parse the operator from its dunder name or symbol.
    pub fn parse<P, S, V>(path: P, operator: &str, value: V) -> Result<Filter, StoreError>
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        V: Into<FilterValue>,
    {
        Ok(Filter::new(path, operator.parse()?, value))
    }

    /// Range operators only make sense for ordered values.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.operator.is_range()
            && !matches!(
                self.value.category(),
                DataCategory::Number | DataCategory::DateTime
            )
        {
            return Err(StoreError::Validation(format!(
                "range operator '{}' on path '{}' is only supported for numbers and datetimes \
                 (suffix the value with {DATETIME_MARKER}), got '{}'",
                self.operator.sparql_symbol(),
                self.path.join("/"),
                self.value
            )));
        }
        if let FilterValue::Vector(_) = self.value {
            if self.operator != FilterOperator::Equal {
                return Err(StoreError::Validation(format!(
                    "vector values on path '{}' only support the equality operator",
                    self.path.join("/")
                )));
            }
        }
        Ok(())
    }
}

/// Flatten a nested mapping into equality filters, one per leaf, depth first and in key order.
/// A key written as `"a/b/c"` contributes every segment to the path.
pub fn filters_from_map(map: &Map<String, Value>) -> Result<Vec<Filter>, StoreError> {
    fn walk(
        map: &Map<String, Value>,
        prefix: &[String],
        acc: &mut Vec<Filter>,
    ) -> Result<(), StoreError> {
        for (key, value) in map.iter() {
            let mut path = prefix.to_vec();
            path.extend(
                key.split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string),
            );
            match value {
                Value::Object(inner) => walk(inner, &path, acc)?,
                leaf => acc.push(Filter {
                    path,
                    operator: FilterOperator::Equal,
                    value: FilterValue::from_json(leaf)?,
                }),
            }
        }
        Ok(())
    }

    let mut filters = Vec::new();
    walk(map, &[], &mut filters)?;
    Ok(filters)
}

/// Search input: either explicit filters or one nested mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterInput {
    Filters(Vec<Filter>),
    Mapping(Map<String, Value>),
}

impl FilterInput {
    pub fn into_filters(self) -> Result<Vec<Filter>, StoreError> {
        match self {
            FilterInput::Filters(filters) => Ok(filters),
            FilterInput::Mapping(map) => filters_from_map(&map),
        }
    }
}

impl From<Vec<Filter>> for FilterInput {
    fn from(filters: Vec<Filter>) -> Self {
        FilterInput::Filters(filters)
    }
}

impl From<Filter> for FilterInput {
    fn from(filter: Filter) -> Self {
        FilterInput::Filters(vec![filter])
    }
}

impl From<Map<String, Value>> for FilterInput {
    fn from(map: Map<String, Value>) -> Self {
        FilterInput::Mapping(map)
    }
}

impl TryFrom<Value> for FilterInput {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(FilterInput::Mapping(map)),
            other => Err(StoreError::Validation(format!(
                "filters must be given as a mapping, got {other}"
            ))),
        }
    }
}
