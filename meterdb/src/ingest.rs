//! Batch ingestion from JSON with partial success.
//!
//! A batch is a JSON array whose entries are either `[timestamp, value]`
//! pairs or `{"timestamp": ..., "value": ...}` objects. Timestamps are
//! integer nanoseconds since the Unix epoch. Values may be JSON numbers or
//! strings holding a number.
//!
//! Entries that cannot be read are skipped and reported; the rest are
//! written. One bad reading never costs the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::point::{Point, check_value};

/// An entry that was not written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedPoint {
    /// Position of the entry in the batch.
    pub index: usize,
    /// Why it was rejected.
    pub reason: String,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Number of points written.
    pub accepted: usize,
    /// Entries skipped, in batch order.
    pub rejected: Vec<RejectedPoint>,
}

impl IngestReport {
    /// Returns `true` if every entry was written.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Splits a batch body into readable points and rejected entries.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidBatch`] if `body` is not an array.
pub fn parse_batch(body: &Value) -> Result<(Vec<Point>, Vec<RejectedPoint>), ValidationError> {
    let entries = body.as_array().ok_or_else(|| ValidationError::InvalidBatch {
        reason: format!("expected a JSON array, got {}", kind(body)),
    })?;

    let mut points = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok(point) => points.push(point),
            Err(reason) => rejected.push(RejectedPoint { index, reason }),
        }
    }
    Ok((points, rejected))
}

fn parse_entry(entry: &Value) -> Result<Point, String> {
    let (timestamp, value) = match entry {
        Value::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
        Value::Object(fields) => (
            fields.get("timestamp").ok_or("missing \"timestamp\"")?,
            fields.get("value").ok_or("missing \"value\"")?,
        ),
        other => {
            return Err(format!(
                "expected [timestamp, value] or an object, got {}",
                kind(other)
            ));
        }
    };

    let timestamp = timestamp
        .as_i64()
        .ok_or_else(|| format!("timestamp {timestamp} is not an integer"))?;
    let value = parse_value(value).map_err(|e| e.to_string())?;
    Ok(Point { timestamp, value })
}

fn parse_value(value: &Value) -> Result<f64, ValidationError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(number) => check_value(number),
        None => Err(ValidationError::NonNumericValue {
            value: value.to_string(),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
