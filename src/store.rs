//! Data access contract shared by the Postgres and in-memory stores.
//!
//! Values always travel as bound parameters. Schema, table and column names
//! cannot be bound, so they are checked with [`validate_identifier`] before
//! they reach any SQL text.

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Value};

use crate::dates::Granularity;
use crate::errors::AppError;

/// A row returned from the store, keyed by column name.
pub type Record = Map<String, Value>;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Scalar {
    /// Converts a flattened JSON leaf. Nested values never reach here after
    /// flattening; they are kept as their JSON text if they do.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Text(n.to_string()),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }

    /// JSON rendering, matching what Postgres' `row_to_json` produces.
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Scalar::Timestamp(t) => Value::String(t.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    /// Text form used for grouping keys; `None` for SQL NULL.
    pub fn as_group_key(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s.clone()),
            other => match other.to_json() {
                Value::String(s) => Some(s),
                value => Some(value.to_string()),
            },
        }
    }

    /// Calendar date of a date-like value.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Scalar::Date(d) => Some(*d),
            Scalar::Timestamp(t) => Some(t.date()),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<&String> for Scalar {
    fn from(value: &String) -> Self {
        Scalar::Text(value.clone())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(value: NaiveDate) -> Self {
        Scalar::Date(value)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(value: NaiveDateTime) -> Self {
        Scalar::Timestamp(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}

/// Ordered column/value pairs for insert and update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Scalar>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets `column`, replacing an earlier value for the same column in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter().position(|c| *c == column) {
            Some(index) => self.values[index] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|index| &self.values[index])
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn to_record(&self) -> Record {
        self.iter()
            .map(|(column, value)| (column.to_string(), value.to_json()))
            .collect()
    }
}

/// Left-hand side of a filter term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterColumn {
    /// `column = value`
    Plain(String),
    /// `date(column) = value`
    Date(String),
}

impl FilterColumn {
    /// Parses a filter key; `date(<column>)` selects date-truncated comparison.
    pub fn parse(key: &str) -> Self {
        let key = key.trim();
        match key
            .strip_prefix("date(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(column) => FilterColumn::Date(column.trim().to_string()),
            None => FilterColumn::Plain(key.to_string()),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            FilterColumn::Plain(column) | FilterColumn::Date(column) => column,
        }
    }
}

impl fmt::Display for FilterColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterColumn::Plain(column) => f.write_str(column),
            FilterColumn::Date(column) => write!(f, "date({})", column),
        }
    }
}

/// Equality terms, all ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(FilterColumn, Scalar)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term keyed by `column` or `date(column)`.
    pub fn eq(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn on_date(mut self, column: &str, date: NaiveDate) -> Self {
        self.terms
            .push((FilterColumn::Date(column.to_string()), Scalar::Date(date)));
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Scalar>) {
        self.terms.push((FilterColumn::parse(key), value.into()));
    }

    pub fn terms(&self) -> &[(FilterColumn, Scalar)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// In-process evaluation with the same semantics as the SQL rendering.
    pub fn matches(&self, row: &Row) -> bool {
        self.terms.iter().all(|(column, expected)| {
            let actual = row.get(column.column()).unwrap_or(&Scalar::Null);
            match (column, expected) {
                (_, Scalar::Null) => *actual == Scalar::Null,
                (FilterColumn::Plain(_), expected) => actual == expected,
                (FilterColumn::Date(_), expected) => {
                    match (actual.as_date(), expected.as_date()) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
                }
            }
        })
    }
}

/// Where the optional grouping dimension is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionSource {
    /// A column of the counted table.
    Column(String),
    /// A column of another table joined on `joined.foreign_key = counted.local_key`.
    Joined {
        schema: String,
        table: String,
        column: String,
        local_key: String,
        foreign_key: String,
    },
}

impl DimensionSource {
    pub fn column(&self) -> &str {
        match self {
            DimensionSource::Column(column) => column,
            DimensionSource::Joined { column, .. } => column,
        }
    }
}

/// Count of rows grouped by date bucket and optional dimension, restricted
/// to `filter` and `from <= date_column < until`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    pub schema: String,
    pub table: String,
    pub date_column: String,
    pub granularity: Granularity,
    pub dimension: Option<DimensionSource>,
    pub filter: Filter,
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl CountQuery {
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = vec![
            self.schema.as_str(),
            self.table.as_str(),
            self.date_column.as_str(),
        ];
        match &self.dimension {
            Some(DimensionSource::Column(column)) => names.push(column.as_str()),
            Some(DimensionSource::Joined {
                schema,
                table,
                column,
                local_key,
                foreign_key,
            }) => names.extend([
                schema.as_str(),
                table.as_str(),
                column.as_str(),
                local_key.as_str(),
                foreign_key.as_str(),
            ]),
            None => {}
        }
        names.extend(self.filter.terms().iter().map(|(c, _)| c.column()));
        names
    }
}

/// One group of a [`CountQuery`] result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedCount {
    /// Bucket label at the query's granularity (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`).
    pub bucket: String,
    pub dimension: Option<String>,
    pub count: i64,
}

/// The relational store behind the service.
///
/// Every call is independent: no connection or transaction spans two calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Rows of `schema.table` matching `filter`.
    async fn get(&self, schema: &str, table: &str, filter: &Filter)
        -> Result<Vec<Record>, AppError>;

    async fn insert(&self, schema: &str, table: &str, row: &Row) -> Result<(), AppError>;

    /// Sets `values` on rows matching `filter`; returns the number of rows changed.
    async fn update(
        &self,
        schema: &str,
        table: &str,
        values: &Row,
        filter: &Filter,
    ) -> Result<u64, AppError>;

    async fn delete(&self, schema: &str, table: &str, filter: &Filter) -> Result<u64, AppError>;

    /// Grouped counts ordered by bucket then dimension.
    async fn count_grouped(&self, query: &CountQuery) -> Result<Vec<GroupedCount>, AppError>;
}

/// Rejects anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<(), AppError> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let pattern = IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .unwrap_or_else(|e| panic!("invalid identifier pattern: {}", e))
    });

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(AppError::InternalError(format!(
            "refusing unsafe SQL identifier {:?}",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_filter_keys() {
        assert_eq!(
            FilterColumn::parse("date(contacted_time)"),
            FilterColumn::Date("contacted_time".to_string())
        );
        assert_eq!(
            FilterColumn::parse("page_id"),
            FilterColumn::Plain("page_id".to_string())
        );
    }

    #[test]
    fn filter_matches_date_truncated_timestamps() {
        let contacted = NaiveDate::from_ymd_opt(2021, 11, 8)
            .unwrap()
            .and_hms_opt(22, 40, 31)
            .unwrap();
        let row = Row::new()
            .with("thumbtack_business_id", "437282430088732672")
            .with("contacted_time", contacted);

        let filter = Filter::new()
            .eq("thumbtack_business_id", "437282430088732672")
            .eq("date(contacted_time)", NaiveDate::from_ymd_opt(2021, 11, 8).unwrap());
        assert!(filter.matches(&row));

        let other_day = Filter::new().on_date(
            "contacted_time",
            NaiveDate::from_ymd_opt(2021, 11, 9).unwrap(),
        );
        assert!(!other_day.matches(&row));
    }

    #[test]
    fn row_set_replaces_in_place() {
        let mut row = Row::new().with("a", 1i64).with("b", 2i64);
        row.set("a", 3i64);
        assert_eq!(row.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(row.get("a"), Some(&Scalar::Int(3)));
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(validate_identifier("thumbtack_business_id").is_ok());
        assert!(validate_identifier("leads; DROP TABLE users").is_err());
        assert!(validate_identifier("1col").is_err());
        assert!(validate_identifier("").is_err());
    }
}
