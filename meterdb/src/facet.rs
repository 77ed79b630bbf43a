//! Facet summaries: distinct-value counts over series metadata.
//!
//! Only a fixed set of columns may be summarised. Column names arriving as
//! text are parsed into [`FacetColumn`]; anything else is a caller error
//! ([`ValidationError::UnknownFacetColumn`]), never an empty result, so a
//! generic aggregation path cannot expose other columns.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::series::{TsType, duration_from_nanos};

/// A series metadata column that can be summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetColumn {
    /// Nominal sampling period.
    Period,
    /// Unit of measurement.
    Units,
    /// Series type.
    TsType,
}

impl FacetColumn {
    /// Every summarisable column.
    pub const ALL: [FacetColumn; 3] = [Self::Period, Self::Units, Self::TsType];

    /// Returns the public name of the column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Units => "units",
            Self::TsType => "ts_type",
        }
    }

    fn sql_column(self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Units => "unit",
            Self::TsType => "ts_type",
        }
    }
}

impl fmt::Display for FacetColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FacetColumn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "period" => Ok(Self::Period),
            "units" | "unit" => Ok(Self::Units),
            "ts_type" => Ok(Self::TsType),
            other => Err(ValidationError::UnknownFacetColumn {
                column: other.to_string(),
            }),
        }
    }
}

/// One distinct value of a facet column.
///
/// Serialised untagged, so the JSON form carries no variant name. It is an
/// output format only and is not read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FacetValue {
    /// A period value.
    Period(Duration),
    /// A unit value.
    Unit(String),
    /// A series type value.
    TsType(TsType),
}

impl fmt::Display for FacetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period(period) => write!(f, "{}s", period.as_secs_f64()),
            Self::Unit(unit) => f.write_str(unit),
            Self::TsType(ts_type) => f.write_str(ts_type.as_str()),
        }
    }
}

/// Number of series sharing one facet value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    /// The distinct value.
    pub value: FacetValue,
    /// How many series carry it.
    pub count: u64,
}

/// Grouped count over the series table for one column, ordered by value.
pub(crate) fn summarize(
    conn: &Connection,
    column: FacetColumn,
) -> rusqlite::Result<Vec<FacetCount>> {
    let name = column.sql_column();
    let sql = format!("SELECT {name}, COUNT(*) FROM series GROUP BY {name} ORDER BY {name}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let value = match column {
            FacetColumn::Period => FacetValue::Period(duration_from_nanos(row, 0)?),
            FacetColumn::Units => FacetValue::Unit(row.get(0)?),
            FacetColumn::TsType => FacetValue::TsType(row.get(0)?),
        };
        let count: i64 = row.get(1)?;
        Ok(FacetCount {
            value,
            count: u64::try_from(count)
                .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(1, count))?,
        })
    })?;
    rows.collect()
}
