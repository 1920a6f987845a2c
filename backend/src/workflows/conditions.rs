// Workflow Conditions - Guard expressions evaluated before actions run

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::context::{resolve_path, ExecutionContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("NOT group must have exactly one child, found {children}")]
    InvalidNotArity { children: usize },

    #[error("Unknown condition operator on field '{field}'")]
    UnknownOperator { field: String },
}

pub type ConditionResult<T> = Result<T, ConditionError>;

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    // Equality
    Equals,
    NotEquals,

    // Numeric comparisons
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,

    // String operations
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    MatchesRegex,

    // Membership
    In,
    NotIn,

    // Null checks
    IsNull,
    IsNotNull,

    // Boolean
    IsTrue,
    IsFalse,

    // Dates
    Before,
    After,
    Between,

    #[serde(other)]
    Unknown,
}

impl ConditionOperator {
    pub fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot path into the execution context, e.g. `entity.data.budget`
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub children: Vec<ConditionTree>,
}

/// Either a leaf condition or a logical group of subtrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionTree {
    Group(ConditionGroup),
    Condition(Condition),
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn ends_with(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::EndsWith, Value::String(value.to_string()))
    }

    pub fn matches_regex(field: &str, pattern: &str) -> Self {
        Self::new(field, ConditionOperator::MatchesRegex, Value::String(pattern.to_string()))
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNull, Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNotNull, Value::Null)
    }

    pub fn before(field: &str, date: &str) -> Self {
        Self::new(field, ConditionOperator::Before, Value::String(date.to_string()))
    }

    pub fn between(field: &str, start: &str, end: &str) -> Self {
        Self::new(field, ConditionOperator::Between, serde_json::json!([start, end]))
    }
}

impl From<Condition> for ConditionTree {
    fn from(condition: Condition) -> Self {
        ConditionTree::Condition(condition)
    }
}

impl ConditionTree {
    pub fn and(children: Vec<ConditionTree>) -> Self {
        Self::group(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<ConditionTree>) -> Self {
        Self::group(LogicalOperator::Or, children)
    }

    pub fn not(child: ConditionTree) -> Self {
        Self::group(LogicalOperator::Not, vec![child])
    }

    fn group(logical_operator: LogicalOperator, children: Vec<ConditionTree>) -> Self {
        ConditionTree::Group(ConditionGroup {
            logical_operator,
            children,
        })
    }

    /// Report the first configuration error anywhere in the tree.
    pub fn validate(&self) -> ConditionResult<()> {
        match self {
            ConditionTree::Condition(c) if c.operator == ConditionOperator::Unknown => {
                Err(ConditionError::UnknownOperator {
                    field: c.field.clone(),
                })
            }
            ConditionTree::Condition(_) => Ok(()),
            ConditionTree::Group(group) => {
                if group.logical_operator == LogicalOperator::Not && group.children.len() != 1 {
                    return Err(ConditionError::InvalidNotArity {
                        children: group.children.len(),
                    });
                }
                group.children.iter().try_for_each(ConditionTree::validate)
            }
        }
    }
}

/// Something condition paths can be resolved against
pub trait FieldSource {
    /// `None` means the path is undefined
    fn resolve(&self, path: &str) -> Option<Value>;
}

impl FieldSource for Value {
    fn resolve(&self, path: &str) -> Option<Value> {
        resolve_path(self, path).cloned()
    }
}

impl FieldSource for ExecutionContext {
    fn resolve(&self, path: &str) -> Option<Value> {
        self.namespace().resolve(path)
    }
}

/// Evaluates condition trees. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// A missing tree always passes.
    pub fn evaluate<S>(&self, tree: Option<&ConditionTree>, source: &S) -> ConditionResult<bool>
    where
        S: FieldSource + ?Sized,
    {
        match tree {
            None => Ok(true),
            Some(tree) => self.evaluate_node(tree, source),
        }
    }

    fn evaluate_node<S>(&self, node: &ConditionTree, source: &S) -> ConditionResult<bool>
    where
        S: FieldSource + ?Sized,
    {
        match node {
            ConditionTree::Condition(condition) => self.evaluate_condition(condition, source),
            ConditionTree::Group(group) => self.evaluate_group(group, source),
        }
    }

    fn evaluate_group<S>(&self, group: &ConditionGroup, source: &S) -> ConditionResult<bool>
    where
        S: FieldSource + ?Sized,
    {
        match group.logical_operator {
            LogicalOperator::And => {
                for child in &group.children {
                    if !self.evaluate_node(child, source)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalOperator::Or => {
                for child in &group.children {
                    if self.evaluate_node(child, source)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicalOperator::Not => match group.children.as_slice() {
                [only] => Ok(!self.evaluate_node(only, source)?),
                children => Err(ConditionError::InvalidNotArity {
                    children: children.len(),
                }),
            },
        }
    }

    fn evaluate_condition<S>(&self, condition: &Condition, source: &S) -> ConditionResult<bool>
    where
        S: FieldSource + ?Sized,
    {
        let actual = source.resolve(&condition.field);
        let actual = actual.as_ref();
        let expected = &condition.value;

        // An unresolved path only satisfies the null checks
        if actual.is_none() && !condition.operator.is_null_check() {
            return match condition.operator {
                ConditionOperator::Unknown => Err(ConditionError::UnknownOperator {
                    field: condition.field.clone(),
                }),
                _ => Ok(false),
            };
        }

        let result = match condition.operator {
            ConditionOperator::Equals => actual.is_some_and(|a| values_equal(a, expected)),
            ConditionOperator::NotEquals => actual.is_some_and(|a| !values_equal(a, expected)),

            ConditionOperator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
            ConditionOperator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
            ConditionOperator::GreaterOrEqual => compare_numbers(actual, expected, |a, b| a >= b),
            ConditionOperator::LessOrEqual => compare_numbers(actual, expected, |a, b| a <= b),

            ConditionOperator::Contains => compare_text(actual, expected, |a, b| a.contains(b)),
            ConditionOperator::NotContains => compare_text(actual, expected, |a, b| !a.contains(b)),
            ConditionOperator::StartsWith => compare_text(actual, expected, |a, b| a.starts_with(b)),
            ConditionOperator::EndsWith => compare_text(actual, expected, |a, b| a.ends_with(b)),
            ConditionOperator::MatchesRegex => matches_regex(actual, expected),

            ConditionOperator::In => membership(actual, expected).unwrap_or(false),
            ConditionOperator::NotIn => membership(actual, expected).is_some_and(|found| !found),

            ConditionOperator::IsNull => actual.is_none_or(Value::is_null),
            ConditionOperator::IsNotNull => actual.is_some_and(|a| !a.is_null()),

            ConditionOperator::IsTrue => actual == Some(&Value::Bool(true)),
            ConditionOperator::IsFalse => actual == Some(&Value::Bool(false)),

            ConditionOperator::Before => compare_dates(actual, expected, |a, b| a < b),
            ConditionOperator::After => compare_dates(actual, expected, |a, b| a > b),
            ConditionOperator::Between => between_dates(actual, expected),

            ConditionOperator::Unknown => {
                return Err(ConditionError::UnknownOperator {
                    field: condition.field.clone(),
                });
            }
        };

        Ok(result)
    }
}

/// Strict equality with numeric normalisation (1 == 1.0)
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn compare_numbers(actual: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn compare_text(actual: Option<&Value>, expected: &Value, cmp: impl Fn(&str, &str) -> bool) -> bool {
    match (actual, expected) {
        (Some(Value::String(a)), Value::String(b)) => cmp(&a.to_lowercase(), &b.to_lowercase()),
        _ => false,
    }
}

fn matches_regex(actual: Option<&Value>, expected: &Value) -> bool {
    let (Some(Value::String(text)), Value::String(pattern)) = (actual, expected) else {
        return false;
    };

    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!("Invalid regex pattern '{}' in workflow condition: {}", pattern, e);
            false
        }
    }
}

/// `None` when the expected value is not a list
fn membership(actual: Option<&Value>, expected: &Value) -> Option<bool> {
    let Value::Array(items) = expected else {
        return None;
    };
    Some(actual.is_some_and(|a| items.iter().any(|item| values_equal(a, item))))
}

/// Parse RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD` or epoch milliseconds.
pub(crate) fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt.and_utc());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

fn compare_dates(
    actual: Option<&Value>,
    expected: &Value,
    cmp: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> bool {
    match (actual.and_then(parse_date), parse_date(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn between_dates(actual: Option<&Value>, expected: &Value) -> bool {
    let Value::Array(bounds) = expected else {
        return false;
    };
    let [start, end] = bounds.as_slice() else {
        return false;
    };

    match (actual.and_then(parse_date), parse_date(start), parse_date(end)) {
        (Some(a), Some(start), Some(end)) => start <= a && a <= end,
        _ => false,
    }
}

/// Common condition presets for project workflows
pub mod presets {
    use super::*;

    /// Project budget strictly above `amount`
    pub fn budget_above(amount: f64) -> ConditionTree {
        Condition::greater_than("entity.data.budget", amount).into()
    }

    pub fn status_is(status: &str) -> ConditionTree {
        Condition::equals("entity.data.status", serde_json::json!(status)).into()
    }

    pub fn has_client_email() -> ConditionTree {
        Condition::is_not_null("entity.data.clientEmail").into()
    }

    pub fn priority_in(priorities: &[&str]) -> ConditionTree {
        Condition::in_list(
            "entity.data.priority",
            priorities.iter().map(|p| serde_json::json!(p)).collect(),
        )
        .into()
    }

    pub fn unassigned() -> ConditionTree {
        Condition::is_null("entity.data.assigneeId").into()
    }
}
