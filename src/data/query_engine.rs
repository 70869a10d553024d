//! Query pipeline: search -> column filters -> sort -> group
//!
//! `QueryEngine::compute` is pure. It never mutates the table and never
//! returns an error: failing custom predicates exclude the row, failing
//! comparators treat the pair as equal, and both are reported through
//! `PipelineDiagnostics`.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

use crate::data::column::{ColumnDef, ColumnSet, ColumnType};
use crate::data::datatable::{DataRow, DataTable};
use crate::data::datavalue_compare::compare_typed;
use crate::data::filter::{FilterCriterion, FilterSet};
use crate::data::grouping::{group_rows, RowGroup};
use crate::data::sort::{SortCriterion, SortState};
use crate::error::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Case-insensitive substring match
    #[default]
    Substring,
    /// Skim-style fuzzy match
    Fuzzy,
}

/// Everything the pipeline needs besides the rows themselves
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub search: String,
    pub search_mode: SearchMode,
    pub filters: FilterSet,
    pub sorts: SortState,
    pub group_by: Option<String>,
}

/// Serializable form of `QueryState` (custom predicates are dropped)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedQuery {
    pub search: String,
    pub search_mode: SearchMode,
    pub filters: Vec<FilterCriterion>,
    pub sorts: Vec<SortCriterion>,
    pub group_by: Option<String>,
}

impl From<&QueryState> for SavedQuery {
    fn from(state: &QueryState) -> Self {
        Self {
            search: state.search.clone(),
            search_mode: state.search_mode,
            filters: state.filters.persistable(),
            sorts: state.sorts.persistable(),
            group_by: state.group_by.clone(),
        }
    }
}

impl From<SavedQuery> for QueryState {
    fn from(saved: SavedQuery) -> Self {
        Self {
            search: saved.search,
            search_mode: saved.search_mode,
            filters: saved.filters.into_iter().collect(),
            sorts: saved.sorts.into_iter().collect(),
            group_by: saved.group_by,
        }
    }
}

/// Side-channel for predicate failures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineDiagnostics {
    pub errors: Vec<PredicateError>,
}

impl PipelineDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn report(&mut self, error: PredicateError) {
        warn!(target: "query", "{}", error);
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Table positions in output order
    pub ordered: Vec<usize>,
    /// Populated when the query groups by a known column
    pub groups: Vec<RowGroup>,
    pub diagnostics: PipelineDiagnostics,
}

/// A sort key resolved against the column configuration
struct SortKey<'a> {
    criterion: &'a SortCriterion,
    field: &'a str,
    column_type: ColumnType,
}

pub struct QueryEngine {
    matcher: SkimMatcherV2,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    pub fn compute(&self, table: &DataTable, columns: &ColumnSet, query: &QueryState) -> QueryOutput {
        let start = Instant::now();
        let mut diagnostics = PipelineDiagnostics::default();

        let mut ordered: Vec<usize> = (0..table.len()).collect();
        let before = ordered.len();

        let needle = query.search.trim().to_lowercase();
        if !needle.is_empty() {
            ordered.retain(|&pos| self.row_matches_search(&table.rows()[pos], columns, &needle, query.search_mode));
        }

        if !query.filters.is_empty() {
            self.apply_filters(table, columns, &query.filters, &mut ordered, &mut diagnostics);
        }

        if !query.sorts.is_empty() {
            Self::apply_sort(table, columns, &query.sorts, &mut ordered, &mut diagnostics);
        }

        let groups = match query.group_by.as_deref() {
            Some(id) => match columns.get(id) {
                Some(column) => group_rows(table, &ordered, column, columns),
                None => {
                    warn!(target: "query", column = id, "Ignoring group-by on unknown column");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        debug!(
            target: "query",
            input = before,
            output = ordered.len(),
            groups = groups.len(),
            errors = diagnostics.errors.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Pipeline computed"
        );

        QueryOutput {
            ordered,
            groups,
            diagnostics,
        }
    }

    /// Global search over visible columns (all fields when no columns are configured)
    fn row_matches_search(
        &self,
        row: &DataRow,
        columns: &ColumnSet,
        needle: &str,
        mode: SearchMode,
    ) -> bool {
        let hit = |text: String| match mode {
            SearchMode::Substring => text.to_lowercase().contains(needle),
            SearchMode::Fuzzy => self.matcher.fuzzy_match(&text, needle).is_some(),
        };

        if columns.is_empty() {
            return row.values.values().any(|v| hit(v.to_string()));
        }
        columns.visible().any(|c| hit(c.value(row).to_string()))
    }

    fn apply_filters(
        &self,
        table: &DataTable,
        columns: &ColumnSet,
        filters: &FilterSet,
        ordered: &mut Vec<usize>,
        diagnostics: &mut PipelineDiagnostics,
    ) {
        let mut active: Vec<(&FilterCriterion, ColumnDef)> = Vec::with_capacity(filters.len());
        for criterion in filters.iter() {
            match columns.get(&criterion.column) {
                Some(column) if column.filterable => active.push((criterion, column.clone())),
                Some(_) => {
                    warn!(target: "query", column = %criterion.column, "Ignoring filter on non-filterable column")
                }
                // Custom predicates do not need a column definition
                None if criterion.is_custom() => active.push((
                    criterion,
                    ColumnDef::new(criterion.column.clone(), ColumnType::Text),
                )),
                None => {
                    warn!(target: "query", column = %criterion.column, "Ignoring filter on unknown column")
                }
            }
        }

        ordered.retain(|&pos| {
            let row = &table.rows()[pos];
            active.iter().all(|(criterion, column)| {
                match criterion.evaluate(row, column) {
                    Ok(keep) => keep,
                    Err(message) => {
                        let row_id = table.ids()[pos].clone();
                        diagnostics.report(PredicateError::Filter {
                            column: criterion.column.clone(),
                            row_id,
                            message,
                        });
                        false
                    }
                }
            })
        });
    }

    fn apply_sort(
        table: &DataTable,
        columns: &ColumnSet,
        sorts: &SortState,
        ordered: &mut [usize],
        diagnostics: &mut PipelineDiagnostics,
    ) {
        let keys: Vec<SortKey> = sorts
            .criteria()
            .iter()
            .filter_map(|criterion| match columns.get(&criterion.column) {
                Some(column) if column.sortable => Some(SortKey {
                    criterion,
                    field: column.field.as_str(),
                    column_type: column.column_type,
                }),
                Some(_) => {
                    warn!(target: "query", column = %criterion.column, "Ignoring sort on non-sortable column");
                    None
                }
                None => {
                    warn!(target: "query", column = %criterion.column, "Ignoring sort on unknown column");
                    None
                }
            })
            .collect();
        if keys.is_empty() {
            return;
        }

        let rows = table.rows();
        let custom = keys.iter().any(|key| key.criterion.comparator().is_some());
        let mut compare = |a: usize, b: usize| -> Ordering {
            for key in &keys {
                let va = rows[a].get(key.field);
                let vb = rows[b].get(key.field);

                // Missing values go last in both directions
                let ordering = match (va.is_null(), vb.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let raw = match key.criterion.comparator() {
                            Some(cmp) => cmp(va, vb).unwrap_or_else(|message| {
                                diagnostics.report(PredicateError::Comparator {
                                    column: key.criterion.column.clone(),
                                    message,
                                });
                                Ordering::Equal
                            }),
                            None => compare_typed(va, vb, key.column_type),
                        };
                        key.criterion.direction.apply(raw)
                    }
                };

                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        };

        if custom {
            // Caller comparators may fail or be inconsistent
            merge_sort_by(ordered, &mut compare);
        } else {
            // compare_typed is a total order; slice::sort_by is stable
            ordered.sort_by(|&a, &b| compare(a, b));
        }
    }
}

/// Stable bottom-up merge sort that accepts any comparator. Unlike
/// `slice::sort_by` it never panics on an ordering that is not total.
fn merge_sort_by<F>(ordered: &mut [usize], mut compare: F)
where
    F: FnMut(usize, usize) -> Ordering,
{
    let len = ordered.len();
    let mut buf = ordered.to_vec();
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                // Right side wins only when strictly less
                if compare(ordered[j], ordered[i]) == Ordering::Less {
                    buf[k] = ordered[j];
                    j += 1;
                } else {
                    buf[k] = ordered[i];
                    i += 1;
                }
                k += 1;
            }
            let rest = mid - i;
            buf[k..k + rest].copy_from_slice(&ordered[i..mid]);
            buf[k + rest..end].copy_from_slice(&ordered[j..end]);
            start = end;
        }
        ordered.copy_from_slice(&buf);
        width *= 2;
    }
}
