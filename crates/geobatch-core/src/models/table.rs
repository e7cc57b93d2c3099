//! Tabular statistic results.
//!
//! A `PartialTable` is what one extraction chunk (or one remote reduction
//! call) produces; a `ResultTable` is the merged, complete batch output with
//! exactly one row per plot.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{GeobatchError, Result};
use crate::models::FeatureId;

/// Named reduction applied to the pixels of a plot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Count => "count",
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = GeobatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Reduction::Sum),
            "mean" => Ok(Reduction::Mean),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "count" => Ok(Reduction::Count),
            _ => Err(GeobatchError::ConfigInvalid {
                key: "operations".to_string(),
                reason: format!("Unknown reduction: {}. Use sum, mean, min, max, or count", s),
            }),
        }
    }
}

/// Column names for every (band, operation) pair, band-major
pub fn statistic_columns(band_names: &[String], operations: &[Reduction]) -> Vec<String> {
    band_names
        .iter()
        .flat_map(|band| operations.iter().map(move |op| format!("{}_{}", band, op)))
        .collect()
}

/// JSON has no NaN; `null` statistics read back as NaN
fn nullable_values<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// One row of a partial table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub feature_id: FeatureId,
    #[serde(deserialize_with = "nullable_values")]
    pub values: Vec<f64>,
}

/// Statistics for a subset of plots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialTable {
    pub columns: Vec<String>,
    pub rows: Vec<StatRow>,
}

impl PartialTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn push(&mut self, feature_id: FeatureId, values: Vec<f64>) {
        self.rows.push(StatRow { feature_id, values });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Concatenate tables in order; column sets must agree
    pub fn concat(tables: Vec<PartialTable>) -> Result<PartialTable> {
        let mut iter = tables.into_iter();
        let mut merged = match iter.next() {
            Some(first) => first,
            None => return Ok(PartialTable::default()),
        };
        for table in iter {
            if table.is_empty() {
                continue;
            }
            if merged.columns.is_empty() && merged.rows.is_empty() {
                merged.columns = table.columns;
            } else if table.columns != merged.columns {
                return Err(GeobatchError::Serialization(format!(
                    "Cannot concatenate tables with different columns: {:?} vs {:?}",
                    merged.columns, table.columns
                )));
            }
            merged.rows.extend(table.rows);
        }
        Ok(merged)
    }
}

/// One row of the final table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub feature_id: FeatureId,
    #[serde(deserialize_with = "nullable_values")]
    pub values: Vec<f64>,
    /// Set when no statistics could be produced for this plot
    pub missing: bool,
}

/// Final batch output: one row per plot, ordered by feature id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, feature_id: &FeatureId) -> Option<&ResultRow> {
        self.rows.iter().find(|r| &r.feature_id == feature_id)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of one cell, `None` for unknown rows or columns
    pub fn value(&self, feature_id: &FeatureId, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(feature_id).and_then(|r| r.values.get(idx).copied())
    }

    pub fn missing_count(&self) -> usize {
        self.rows.iter().filter(|r| r.missing).count()
    }

    pub fn complete_count(&self) -> usize {
        self.len() - self.missing_count()
    }

    /// Write as CSV: `feature_id` then every statistic column, NaN as empty
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("feature_id".to_string());
        header.extend(self.columns.iter().cloned());
        csv_writer.write_record(&header).map_err(csv_error)?;

        for row in &self.rows {
            let mut record = Vec::with_capacity(row.values.len() + 1);
            record.push(row.feature_id.to_string());
            for value in &row.values {
                if value.is_nan() {
                    record.push(String::new());
                } else {
                    record.push(value.to_string());
                }
            }
            csv_writer.write_record(&record).map_err(csv_error)?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> GeobatchError {
    GeobatchError::Serialization(format!("Failed to write CSV: {}", e))
}
