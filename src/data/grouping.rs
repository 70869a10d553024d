//! Grouping of ordered rows and column aggregates

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::data::column::{Aggregation, ColumnDef, ColumnSet};
use crate::data::datatable::{DataRow, DataTable, DataValue};

/// One bucket of rows sharing a group-column value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowGroup {
    /// Display key (stringified group value)
    pub key: String,
    pub value: DataValue,
    /// Table positions, in pipeline output order
    pub rows: Vec<usize>,
    pub aggregates: BTreeMap<String, f64>,
}

impl RowGroup {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Running sum/count for one column
#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

/// Aggregate every column declaring `sum` or `avg` over the given rows.
/// Values that do not coerce to numbers are skipped; columns with no
/// numeric values are left out of the result.
pub fn aggregate<'a, I>(rows: I, columns: &ColumnSet) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = &'a DataRow>,
{
    let targets: Vec<&ColumnDef> = columns
        .iter()
        .filter(|c| c.aggregation != Aggregation::None)
        .collect();
    if targets.is_empty() {
        return BTreeMap::new();
    }

    let mut acc = vec![Accumulator::default(); targets.len()];
    for row in rows {
        for (slot, column) in acc.iter_mut().zip(&targets) {
            if let Some(n) = column.value(row).as_f64() {
                slot.sum += n;
                slot.count += 1;
            }
        }
    }

    targets
        .iter()
        .zip(acc)
        .filter(|(_, a)| a.count > 0)
        .map(|(column, a)| {
            let value = match column.aggregation {
                Aggregation::Avg => a.sum / a.count as f64,
                _ => a.sum,
            };
            (column.id.clone(), value)
        })
        .collect()
}

/// Bucket `ordered` (table positions) by the value of `group_column`.
///
/// Groups appear in order of first occurrence, so a sorted input yields
/// groups in sort order; rows inside a group keep their relative order.
pub fn group_rows(
    table: &DataTable,
    ordered: &[usize],
    group_column: &ColumnDef,
    columns: &ColumnSet,
) -> Vec<RowGroup> {
    let mut groups: Vec<RowGroup> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for &pos in ordered {
        let Some(row) = table.row_at(pos) else {
            continue;
        };
        let value = group_column.value(row);
        let key = group_column.format(value);
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            groups.push(RowGroup {
                key,
                value: value.clone(),
                rows: Vec::new(),
                aggregates: BTreeMap::new(),
            });
            groups.len() - 1
        });
        groups[slot].rows.push(pos);
    }

    for group in &mut groups {
        group.aggregates = aggregate(group.rows.iter().filter_map(|&p| table.row_at(p)), columns);
    }
    groups
}
