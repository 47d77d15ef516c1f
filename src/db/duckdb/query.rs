//! Small typed SELECT builder
//!
//! Column lists and predicates are fixed strings chosen by the caller; values
//! are always bound as parameters.

use super::schema::TableName;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inclusive date window; either bound may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn is_open(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Stable text form used in cache keys
    pub fn cache_repr(&self) -> String {
        let fmt = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        format!("{}..{}", fmt(self.start), fmt(self.end))
    }
}

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: TableName,
    columns: String,
    filters: Vec<String>,
    params: Vec<String>,
    order_by: Vec<&'static str>,
}

impl SelectBuilder {
    pub fn from(table: TableName, columns: &str) -> Self {
        Self {
            table,
            columns: columns.to_string(),
            filters: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.filters.push(format!("{} = ?", column));
        self.params.push(value.into());
        self
    }

    pub fn eq_opt(self, column: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    /// `column IN (?, ..)`; an empty list matches nothing
    pub fn in_list<I, S>(mut self, column: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.filters.push("FALSE".to_string());
            return self;
        }
        let slots = vec!["?"; values.len()].join(", ");
        self.filters.push(format!("{} IN ({})", column, slots));
        self.params.extend(values);
        self
    }

    pub fn date_range(mut self, column: &'static str, range: Option<DateRange>) -> Self {
        let Some(range) = range else {
            return self;
        };
        if let Some(start) = range.start {
            self.filters.push(format!("{} >= CAST(? AS DATE)", column));
            self.params.push(start.to_string());
        }
        if let Some(end) = range.end {
            self.filters.push(format!("{} <= CAST(? AS DATE)", column));
            self.params.push(end.to_string());
        }
        self
    }

    pub fn order_by(mut self, expr: &'static str) -> Self {
        self.order_by.push(expr);
        self
    }

    /// SQL text and its bound parameters, in order
    pub fn build(self) -> (String, Vec<String>) {
        let mut sql = format!("SELECT {} FROM {}", self.columns, self.table);
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        (sql, self.params)
    }
}
