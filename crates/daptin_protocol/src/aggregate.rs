//! Aggregation query builder.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value on the right-hand side of an aggregation filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// SQL null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// Free text, sent as-is.
    Text(String),
    /// A reference to another resource, rendered as `entity@id`.
    Reference {
        /// Referenced type name.
        entity: String,
        /// Referenced reference id.
        id: String,
    },
}

impl FilterValue {
    /// Creates a reference value.
    pub fn reference(entity: impl Into<String>, id: impl Into<String>) -> Self {
        FilterValue::Reference {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("null"),
            FilterValue::Bool(b) => write!(f, "{b}"),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Text(s) => f.write_str(s),
            FilterValue::Reference { entity, id } => write!(f, "{entity}@{id}"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Number(f64::from(value))
    }
}

impl From<u64> for FilterValue {
    fn from(value: u64) -> Self {
        FilterValue::Number(value as f64)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value as f64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

/// An aggregation request, built fluently and sent to `/aggregate/<entity>`.
///
/// ```
/// use daptin_protocol::AggregateRequest;
///
/// let request = AggregateRequest::new()
///     .entity("order")
///     .group_by(["status"])
///     .count()
///     .gte("amount", 10)
///     .order_by(["-count"]);
/// assert_eq!(request.filter, vec!["gte(amount,10)"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregateRequest {
    /// Table the aggregation runs on.
    pub root_entity: String,
    /// Joins, as `table@cond1&cond2`.
    pub join: Vec<String>,
    /// Grouping columns.
    pub group_by: Vec<String>,
    /// Projected columns and aggregate expressions.
    pub project_column: Vec<String>,
    /// Raw query clauses.
    pub query: Vec<String>,
    /// Ordering; a `-` prefix sorts descending.
    pub order: Vec<String>,
    /// Conditions on aggregate results.
    pub having: Vec<String>,
    /// Row filters, as `op(column,value)`.
    pub filter: Vec<String>,
    /// Time bucket format for time series.
    pub time_sample: String,
    /// Start of the time range.
    pub time_from: String,
    /// End of the time range.
    pub time_to: String,
}

impl AggregateRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root entity.
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.root_entity = entity.into();
        self
    }

    /// Joins `table` on every condition (`column eq value` or `col eq col@table`).
    pub fn join<I, S>(mut self, table: &str, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let conditions: Vec<String> = conditions
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();
        self.join.push(format!("{table}@{}", conditions.join("&")));
        self
    }

    /// Adds grouping columns.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds projected columns or aggregate expressions.
    pub fn project<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project_column.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Projects the row count.
    pub fn count(mut self) -> Self {
        self.project_column.push("count".to_string());
        self
    }

    /// Projects `sum(column)`.
    pub fn sum(self, column: &str) -> Self {
        self.project([format!("sum({column})")])
    }

    /// Projects `avg(column)`.
    pub fn avg(self, column: &str) -> Self {
        self.project([format!("avg({column})")])
    }

    /// Projects `min(column)`.
    pub fn min(self, column: &str) -> Self {
        self.project([format!("min({column})")])
    }

    /// Projects `max(column)`.
    pub fn max(self, column: &str) -> Self {
        self.project([format!("max({column})")])
    }

    /// Adds a filter `operator(column,value)`.
    pub fn filter(mut self, column: &str, operator: &str, value: impl Into<FilterValue>) -> Self {
        self.filter
            .push(format!("{operator}({column},{})", value.into()));
        self
    }

    /// Equality filter.
    pub fn eq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "=", value)
    }

    /// Inequality filter.
    pub fn neq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "not", value)
    }

    /// Less-than filter.
    pub fn lt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "lt", value)
    }

    /// Less-or-equal filter.
    pub fn lte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "lte", value)
    }

    /// Greater-than filter.
    pub fn gt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "gt", value)
    }

    /// Greater-or-equal filter.
    pub fn gte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, "gte", value)
    }

    /// Membership filter.
    pub fn is_in<I, S>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = join_values(values);
        self.filter(column, "in", joined)
    }

    /// Non-membership filter.
    pub fn not_in<I, S>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = join_values(values);
        self.filter(column, "notin", joined)
    }

    /// `column is null`.
    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, "is", FilterValue::Null)
    }

    /// `column is not null`.
    pub fn is_not_null(self, column: &str) -> Self {
        self.filter(column, "not", FilterValue::Null)
    }

    /// `column is true`.
    pub fn is_true(self, column: &str) -> Self {
        self.filter(column, "is", true)
    }

    /// `column is not true`.
    pub fn is_not_true(self, column: &str) -> Self {
        self.filter(column, "not", true)
    }

    /// `column is false`.
    pub fn is_false(self, column: &str) -> Self {
        self.filter(column, "is", false)
    }

    /// `column is not false`.
    pub fn is_not_false(self, column: &str) -> Self {
        self.filter(column, "not", false)
    }

    /// Adds a condition on an aggregate expression.
    pub fn having(mut self, expression: &str, operator: &str, value: impl Into<FilterValue>) -> Self {
        self.having
            .push(format!("{operator}({expression},{})", value.into()));
        self
    }

    /// Adds ordering columns.
    pub fn order_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Sets the time bucket format.
    pub fn time_sample(mut self, format: impl Into<String>) -> Self {
        self.time_sample = format.into();
        self
    }

    /// Sets the start of the time range.
    pub fn time_from(mut self, from: impl Into<String>) -> Self {
        self.time_from = from.into();
        self
    }

    /// Sets the end of the time range.
    pub fn time_to(mut self, to: impl Into<String>) -> Self {
        self.time_to = to.into();
        self
    }

    /// Checks the request can be executed.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.root_entity.trim().is_empty() {
            return Err(ProtocolError::Validation(
                "root entity must be specified".to_string(),
            ));
        }
        Ok(())
    }
}

fn join_values<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
