//! Raw API table parsing
//!
//! The statistical API answers with a JSON array-of-arrays whose first row
//! is a header. This module is the only place that sees that shape;
//! everything downstream consumes [`Observation`] rows. Suppression
//! sentinels in estimate cells parse to `None`, never to zero.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{GeoLevel, Observation};
use crate::variables::ResolvedVariable;

/// Sentinel values ACS tabulations use for suppressed or unavailable
/// cells (insufficient sample, median falls in an open-ended bin, etc).
const SUPPRESSION_SENTINELS: [i64; 6] = [
    -999999999,
    -888888888,
    -666666666,
    -555555555,
    -333333333,
    -222222222,
];

/// Parse one raw payload into observations, one per (source unit,
/// requested variable).
pub fn parse_table(
    payload: &str,
    variables: &[ResolvedVariable],
    geo_level: GeoLevel,
) -> Result<Vec<Observation>> {
    let table: Value = serde_json::from_str(payload)
        .map_err(|e| Error::InvalidRequest(format!("malformed response body: {}", e)))?;

    let rows = table
        .as_array()
        .ok_or_else(|| Error::InvalidRequest("response is not a JSON array".to_string()))?;

    let mut rows = rows.iter();
    let header = rows
        .next()
        .ok_or_else(|| Error::InvalidRequest("response table is empty".to_string()))?;
    let header = string_row(header)?;

    let column_index: HashMap<&str, usize> = header
        .iter()
        .enumerate()
        .map(|(idx, name)| (*name, idx))
        .collect();

    // Every geography component must be present to assemble the geo id.
    let geo_columns: Vec<usize> = geo_level
        .id_columns()
        .iter()
        .map(|col| {
            column_index.get(col).copied().ok_or_else(|| {
                Error::InvalidRequest(format!("response missing geography column '{}'", col))
            })
        })
        .collect::<Result<_>>()?;

    // Estimate columns were explicitly requested; a missing one means the
    // response does not match the request.
    let mut value_columns = Vec::with_capacity(variables.len());
    for var in variables {
        let estimate_idx = column_index.get(var.code.as_str()).copied().ok_or_else(|| {
            Error::InvalidRequest(format!("response missing requested column '{}'", var.code))
        })?;
        let moe_idx = var
            .moe_code
            .as_ref()
            .and_then(|code| column_index.get(code.as_str()).copied());
        value_columns.push((var, estimate_idx, moe_idx));
    }

    let mut observations = Vec::new();
    for row in rows {
        let cells = row
            .as_array()
            .ok_or_else(|| Error::InvalidRequest("response row is not an array".to_string()))?;

        let geo_id: String = geo_columns
            .iter()
            .map(|&idx| {
                cells
                    .get(idx)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidRequest("non-string geography cell".to_string()))
            })
            .collect::<Result<Vec<_>>>()?
            .concat();

        for (var, estimate_idx, moe_idx) in &value_columns {
            observations.push(Observation {
                geo_id: geo_id.clone(),
                variable: var.logical.clone(),
                estimate: number_cell(cells.get(*estimate_idx)),
                moe: moe_idx.and_then(|idx| number_cell(cells.get(idx))),
            });
        }
    }

    Ok(observations)
}

fn string_row(row: &Value) -> Result<Vec<&str>> {
    row.as_array()
        .ok_or_else(|| Error::InvalidRequest("header row is not an array".to_string()))?
        .iter()
        .map(|cell| {
            cell.as_str()
                .ok_or_else(|| Error::InvalidRequest("non-string header cell".to_string()))
        })
        .collect()
}

/// Numeric cell extraction. The API serves numbers both as JSON numbers
/// and as quoted strings; nulls and sentinels map to None.
fn number_cell(cell: Option<&Value>) -> Option<f64> {
    let value = match cell? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    if SUPPRESSION_SENTINELS
        .iter()
        .any(|&sentinel| (value - sentinel as f64).abs() < 0.5)
    {
        return None;
    }

    Some(value)
}
