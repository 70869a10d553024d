use std::collections::BTreeSet;

use crate::data::column::ColumnSet;
use crate::data::datatable::{DataRow, DataTable, RowId};
use crate::data::grouping::RowGroup;
use crate::data::pagination::PageSlice;
use crate::data::query_engine::{PipelineDiagnostics, QueryEngine, QueryState};

/// A view over a DataTable that filters, sorts and pages rows
/// without modifying the underlying data
#[derive(Debug, Clone)]
pub struct DataView<'a> {
    /// The underlying data source
    source: &'a DataTable,

    /// Table positions that are visible (after search/filter/sort)
    visible_rows: Vec<usize>,

    groups: Vec<RowGroup>,

    diagnostics: PipelineDiagnostics,

    /// Limit and offset for pagination
    limit: Option<usize>,
    offset: usize,
}

impl<'a> DataView<'a> {
    /// Create a new view showing all data from the table in input order
    pub fn new(source: &'a DataTable) -> Self {
        Self {
            source,
            visible_rows: (0..source.len()).collect(),
            groups: Vec::new(),
            diagnostics: PipelineDiagnostics::default(),
            limit: None,
            offset: 0,
        }
    }

    /// Run the query pipeline and wrap its output
    pub fn from_query(
        source: &'a DataTable,
        columns: &ColumnSet,
        query: &QueryState,
        engine: &QueryEngine,
    ) -> Self {
        let output = engine.compute(source, columns, query);
        Self {
            source,
            visible_rows: output.ordered,
            groups: output.groups,
            diagnostics: output.diagnostics,
            limit: None,
            offset: 0,
        }
    }

    /// Filter rows based on a predicate
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RowId, &DataRow) -> bool,
    {
        let source = self.source;
        self.visible_rows.retain(|&pos| match (source.id_at(pos), source.row_at(pos)) {
            (Some(id), Some(row)) => predicate(id, row),
            _ => false,
        });
        self
    }

    /// Move pinned rows to the top, keeping relative order on both sides
    pub fn pinned_first(mut self, pinned: &BTreeSet<RowId>) -> Self {
        if pinned.is_empty() {
            return self;
        }
        let source = self.source;
        let (mut top, rest): (Vec<usize>, Vec<usize>) = self
            .visible_rows
            .into_iter()
            .partition(|&pos| source.id_at(pos).is_some_and(|id| pinned.contains(id)));
        top.extend(rest);
        self.visible_rows = top;
        self
    }

    /// Apply limit and offset
    pub fn with_limit(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Restrict to one page
    pub fn with_page(self, page: &PageSlice) -> Self {
        let start = page.range.start;
        self.with_limit(page.range.len(), start)
    }

    /// Get the number of visible rows (respecting limit/offset)
    pub fn row_count(&self) -> usize {
        let count = self.visible_rows.len();

        if let Some(limit) = self.limit {
            let available = count.saturating_sub(self.offset);
            available.min(limit)
        } else {
            count.saturating_sub(self.offset)
        }
    }

    /// Number of rows matching the query, ignoring limit/offset
    pub fn total_count(&self) -> usize {
        self.visible_rows.len()
    }

    /// Get a row by index (respecting limit/offset)
    pub fn get_row(&self, index: usize) -> Option<&'a DataRow> {
        self.source.row_at(self.position(index)?)
    }

    pub fn row_id(&self, index: usize) -> Option<&'a RowId> {
        self.source.id_at(self.position(index)?)
    }

    /// Get all visible rows (respecting limit/offset)
    pub fn get_rows(&self) -> Vec<&'a DataRow> {
        (0..self.row_count()).filter_map(|i| self.get_row(i)).collect()
    }

    /// Ids of the rows inside the current limit/offset window
    pub fn page_ids(&self) -> Vec<RowId> {
        (0..self.row_count())
            .filter_map(|i| self.row_id(i).cloned())
            .collect()
    }

    /// Ids of every row matching the query, in output order
    pub fn ordered_ids(&self) -> Vec<RowId> {
        self.visible_rows
            .iter()
            .filter_map(|&pos| self.source.id_at(pos).cloned())
            .collect()
    }

    /// Rows and ids for every row matching the query, in output order
    pub fn ordered_rows(&self) -> Vec<(&'a RowId, &'a DataRow)> {
        let source = self.source;
        self.visible_rows
            .iter()
            .filter_map(|&pos| Some((source.id_at(pos)?, source.row_at(pos)?)))
            .collect()
    }

    /// Position of a row within the full ordered output
    pub fn index_of(&self, id: &RowId) -> Option<usize> {
        let pos = self.source.position(id)?;
        self.visible_rows.iter().position(|&p| p == pos)
    }

    /// Get the source DataTable
    pub fn source(&self) -> &'a DataTable {
        self.source
    }

    /// Get visible row positions (before limit/offset)
    pub fn visible_row_indices(&self) -> &[usize] {
        &self.visible_rows
    }

    pub fn groups(&self) -> &[RowGroup] {
        &self.groups
    }

    pub fn diagnostics(&self) -> &PipelineDiagnostics {
        &self.diagnostics
    }

    fn position(&self, index: usize) -> Option<usize> {
        if let Some(limit) = self.limit {
            if index >= limit {
                return None;
            }
        }
        self.visible_rows.get(index + self.offset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{ColumnDef, ColumnType};
    use crate::data::pagination::page;
    use crate::data::sort::SortCriterion;

    fn table() -> DataTable {
        let mut table = DataTable::keyed_by("items", "id");
        for i in 1..=10i64 {
            table
                .insert(DataRow::new().with("id", i).with("score", (i * 7) % 10))
                .unwrap();
        }
        table
    }

    #[test]
    fn test_new_view_shows_all_rows() {
        let table = table();
        let view = DataView::new(&table);
        assert_eq!(view.row_count(), 10);
        assert_eq!(view.row_id(0), Some(&RowId::Number(1)));
    }

    #[test]
    fn test_page_window() {
        let table = table();
        let view = DataView::new(&table).with_page(&page(10, 2, 4));
        assert_eq!(view.row_count(), 4);
        assert_eq!(
            view.page_ids(),
            vec![RowId::Number(5), RowId::Number(6), RowId::Number(7), RowId::Number(8)]
        );
        assert_eq!(view.total_count(), 10);
        assert!(view.get_row(4).is_none());
    }

    #[test]
    fn test_pinned_rows_move_to_top() {
        let table = table();
        let pinned: BTreeSet<RowId> = [RowId::Number(7), RowId::Number(3)].into_iter().collect();
        let view = DataView::new(&table).pinned_first(&pinned);
        let ids = view.ordered_ids();
        assert_eq!(&ids[..3], &[RowId::Number(3), RowId::Number(7), RowId::Number(1)]);
    }

    #[test]
    fn test_from_query_and_index_of() {
        let table = table();
        let columns = ColumnSet::new(vec![ColumnDef::new("score", ColumnType::Number)]);
        let mut query = QueryState::default();
        query.sorts.set(SortCriterion::desc("score"));
        let view = DataView::from_query(&table, &columns, &query, &QueryEngine::new());

        // score = (id * 7) % 10: id 7 scores 9
        assert_eq!(view.row_id(0), Some(&RowId::Number(7)));
        assert_eq!(view.index_of(&RowId::Number(7)), Some(0));

        let even = view.filter(|_, row| row.get("score").as_f64().unwrap_or(1.0) as i64 % 2 == 0);
        assert!(even.ordered_ids().iter().all(|id| matches!(id, RowId::Number(n) if n % 2 == 0)));
    }
}
