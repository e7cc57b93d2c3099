//! Result aggregation.
//!
//! Partial tables from extraction chunks or remote reductions are left-joined
//! onto the set of expected feature ids. Every plot gets exactly one row;
//! plots without statistics get NaN values and are flagged missing.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use geobatch_core::error::{GeobatchError, Result};
use geobatch_core::models::{FeatureId, PartialTable, Plot, ResultRow, ResultTable};

/// Merge partial tables using the columns of the first table that has any
pub fn merge(plots: &[Plot], partial_tables: &[PartialTable]) -> Result<ResultTable> {
    let columns = partial_tables
        .iter()
        .find(|t| !t.columns.is_empty())
        .map(|t| t.columns.clone())
        .unwrap_or_default();
    merge_into_schema(plots, partial_tables, &columns)
}

/// Merge partial tables into a fixed column set
///
/// Columns are matched by name; a column a partial table lacks is NaN.
/// Duplicate ids, among plots or among joined rows, are fatal. Rows for ids
/// that are not in `plots` are dropped with a warning.
pub fn merge_into_schema(
    plots: &[Plot],
    partial_tables: &[PartialTable],
    columns: &[String],
) -> Result<ResultTable> {
    let mut index: BTreeMap<FeatureId, Option<Vec<f64>>> = BTreeMap::new();
    for plot in plots {
        if index.insert(plot.id.clone(), None).is_some() {
            return Err(GeobatchError::DuplicateFeatureId { feature_id: plot.id.to_string() });
        }
    }

    let mut unknown = 0usize;
    for table in partial_tables {
        let mapping: Vec<Option<usize>> = columns
            .iter()
            .map(|c| table.columns.iter().position(|t| t == c))
            .collect();

        for row in &table.rows {
            let slot = match index.entry(row.feature_id.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(_) => {
                    unknown += 1;
                    continue;
                }
            };
            if slot.is_some() {
                return Err(GeobatchError::DuplicateFeatureId {
                    feature_id: row.feature_id.to_string(),
                });
            }
            *slot = Some(
                mapping
                    .iter()
                    .map(|idx| idx.and_then(|i| row.values.get(i).copied()).unwrap_or(f64::NAN))
                    .collect(),
            );
        }
    }

    if unknown > 0 {
        tracing::warn!(rows = unknown, "Dropped statistic rows for unknown feature ids");
    }

    let rows: Vec<ResultRow> = index
        .into_iter()
        .map(|(feature_id, values)| match values {
            Some(values) => {
                let missing = values.iter().all(|v| v.is_nan());
                ResultRow { feature_id, values, missing }
            }
            None => ResultRow { feature_id, values: vec![f64::NAN; columns.len()], missing: true },
        })
        .collect();

    let table = ResultTable { columns: columns.to_vec(), rows };
    tracing::debug!(
        rows = table.len(),
        missing = table.missing_count(),
        "Merged result table"
    );
    Ok(table)
}

/// Ids of rows that carry no statistics
pub fn missing_ids(table: &ResultTable) -> Vec<FeatureId> {
    table.rows.iter().filter(|r| r.missing).map(|r| r.feature_id.clone()).collect()
}
