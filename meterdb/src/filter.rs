//! Series metadata filters.
//!
//! A [`SeriesFilter`] is a fixed set of optional predicates. Each supplied
//! predicate narrows the result; all of them combine with AND. There is no
//! query language: every predicate maps to one parameterised SQL fragment,
//! so the surface exposed to callers is closed.
//!
//! | field          | matches when                                        |
//! |----------------|-----------------------------------------------------|
//! | `id`           | id equals                                           |
//! | `period`       | period equals                                       |
//! | `period_range` | `start <= period < end`                             |
//! | `ts_types`     | type is any of the set                              |
//! | `name`         | name contains the text, ignoring case               |
//! | `units`        | unit equals any of the set, ignoring case           |
//!
//! An empty set in `ts_types` or `units` matches no series.

use std::ops::Range;
use std::time::Duration;

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::series::{SeriesId, TsType, duration_to_nanos};

/// Optional predicates over series metadata.
///
/// # Example
///
/// ```rust
/// use meterdb::{SeriesFilter, TsType};
/// use std::time::Duration;
///
/// let filter = SeriesFilter::default()
///     .period_range(Duration::from_secs(500)..Duration::from_secs(1000))
///     .ts_types([TsType::Point, TsType::Mean])
///     .name("boiler");
/// assert!(filter.name.is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesFilter {
    /// Exact series id.
    pub id: Option<SeriesId>,
    /// Exact period.
    pub period: Option<Duration>,
    /// Half-open period range.
    pub period_range: Option<Range<Duration>>,
    /// Acceptable series types.
    pub ts_types: Option<Vec<TsType>>,
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    /// Acceptable units, compared case-insensitively.
    pub units: Option<Vec<String>>,
}

impl SeriesFilter {
    /// A filter with no predicates; matches every series.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to a single id.
    #[must_use]
    pub fn id(mut self, id: SeriesId) -> Self {
        self.id = Some(id);
        self
    }

    /// Restricts to an exact period.
    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Restricts to periods in `range` (inclusive start, exclusive end).
    #[must_use]
    pub fn period_range(mut self, range: Range<Duration>) -> Self {
        self.period_range = Some(range);
        self
    }

    /// Restricts to any of the given types.
    #[must_use]
    pub fn ts_types(mut self, ts_types: impl IntoIterator<Item = TsType>) -> Self {
        self.ts_types = Some(ts_types.into_iter().collect());
        self
    }

    /// Restricts to names containing `text`, ignoring case.
    #[must_use]
    pub fn name(mut self, text: impl Into<String>) -> Self {
        self.name = Some(text.into());
        self
    }

    /// Restricts to any of the given units, ignoring case.
    #[must_use]
    pub fn units<S: Into<String>>(mut self, units: impl IntoIterator<Item = S>) -> Self {
        self.units = Some(units.into_iter().map(Into::into).collect());
        self
    }

    /// Renders the filter as a ` WHERE ...` clause (empty when there are no
    /// predicates) and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(id) = self.id {
            clauses.push("id = ?".to_string());
            values.push(Value::Integer(id.0));
        }

        if let Some(period) = self.period {
            match duration_to_nanos(period) {
                Some(nanos) => {
                    clauses.push("period = ?".to_string());
                    values.push(Value::Integer(nanos));
                }
                // No stored period can be that long.
                None => clauses.push("0".to_string()),
            }
        }

        if let Some(range) = &self.period_range {
            match duration_to_nanos(range.start) {
                Some(nanos) => {
                    clauses.push("period >= ?".to_string());
                    values.push(Value::Integer(nanos));
                }
                None => clauses.push("0".to_string()),
            }
            // An end beyond i64 nanoseconds bounds nothing.
            if let Some(nanos) = duration_to_nanos(range.end) {
                clauses.push("period < ?".to_string());
                values.push(Value::Integer(nanos));
            }
        }

        if let Some(ts_types) = &self.ts_types {
            clauses.push(in_list("ts_type", ts_types.len()));
            values.extend(ts_types.iter().map(|t| Value::Text(t.as_str().to_string())));
        }

        if let Some(name) = &self.name {
            clauses.push("instr(lower(name), lower(?)) > 0".to_string());
            values.push(Value::Text(name.clone()));
        }

        if let Some(units) = &self.units {
            clauses.push(in_list("lower(unit)", units.len()));
            values.extend(units.iter().map(|u| Value::Text(u.to_lowercase())));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// `expr IN (?, ?, ...)`, or a constant false for an empty set.
fn in_list(expr: &str, len: usize) -> String {
    if len == 0 {
        return "0".to_string();
    }
    let placeholders = vec!["?"; len].join(", ");
    format!("{expr} IN ({placeholders})")
}
