//! Selected, pinned and favorite row sets
//!
//! Membership is keyed by `RowId`. Ids of deleted or filtered-out rows are
//! kept until `prune` runs; they simply never match a live row.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::data::datatable::{DataTable, RowId};

/// Which rows `select_all` covers. There is no default: callers say which one they mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectScope {
    /// Rows on the current page or virtual window
    Page,
    /// Every row matching search and filters
    Filtered,
    /// Every row in the dataset
    Dataset,
}

/// Row ids for each selection scope, in view order
#[derive(Debug, Clone, Copy)]
pub struct ScopedRows<'a> {
    pub page: &'a [RowId],
    pub filtered: &'a [RowId],
    pub dataset: &'a [RowId],
}

impl<'a> ScopedRows<'a> {
    pub fn ids(&self, scope: SelectScope) -> &'a [RowId] {
        match scope {
            SelectScope::Page => self.page,
            SelectScope::Filtered => self.filtered,
            SelectScope::Dataset => self.dataset,
        }
    }
}

/// Outcome of a range selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSelection {
    /// Number of rows now selected
    Selected(usize),
    /// An endpoint is not in the current ordered view; nothing changed
    EndpointMissing(RowId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowFlags {
    pub selected: bool,
    pub pinned: bool,
    pub favorite: bool,
    pub editing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionSummary {
    pub selected: usize,
    pub pinned: usize,
    pub favorite: usize,
}

/// The three independent marking sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionState {
    pub selected: BTreeSet<RowId>,
    pub pinned: BTreeSet<RowId>,
    pub favorite: BTreeSet<RowId>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionManager {
    state: SelectionState,
    /// Last row toggled, used as the default range anchor
    anchor: Option<RowId>,
}

fn toggle(set: &mut BTreeSet<RowId>, id: &RowId) -> bool {
    if set.remove(id) {
        false
    } else {
        set.insert(id.clone());
        true
    }
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: SelectionState) -> Self {
        Self {
            state,
            anchor: None,
        }
    }

    /// Returns the new membership
    pub fn toggle_select(&mut self, id: &RowId) -> bool {
        let selected = toggle(&mut self.state.selected, id);
        self.anchor = Some(id.clone());
        debug!(row = %id, selected, "Toggled selection");
        selected
    }

    pub fn toggle_pin(&mut self, id: &RowId) -> bool {
        let pinned = toggle(&mut self.state.pinned, id);
        debug!(row = %id, pinned, "Toggled pin");
        pinned
    }

    pub fn toggle_favorite(&mut self, id: &RowId) -> bool {
        let favorite = toggle(&mut self.state.favorite, id);
        debug!(row = %id, favorite, "Toggled favorite");
        favorite
    }

    /// Replace the selection with the inclusive span between two rows of the
    /// current ordered view. Endpoint order does not matter.
    pub fn select_range(
        &mut self,
        anchor: &RowId,
        target: &RowId,
        ordered_ids: &[RowId],
    ) -> RangeSelection {
        let Some(a) = ordered_ids.iter().position(|id| id == anchor) else {
            debug!(row = %anchor, "Range anchor not in view");
            return RangeSelection::EndpointMissing(anchor.clone());
        };
        let Some(b) = ordered_ids.iter().position(|id| id == target) else {
            debug!(row = %target, "Range target not in view");
            return RangeSelection::EndpointMissing(target.clone());
        };

        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        self.state.selected = ordered_ids[start..=end].iter().cloned().collect();
        self.anchor = Some(anchor.clone());
        RangeSelection::Selected(end - start + 1)
    }

    /// Range from the last toggled row, when there is one
    pub fn extend_to(&mut self, target: &RowId, ordered_ids: &[RowId]) -> Option<RangeSelection> {
        let anchor = self.anchor.clone()?;
        Some(self.select_range(&anchor, target, ordered_ids))
    }

    /// Add every row of the requested scope to the selection.
    /// Returns the number of rows in that scope.
    pub fn select_all(&mut self, scope: SelectScope, rows: &ScopedRows<'_>) -> usize {
        let ids = rows.ids(scope);
        self.state.selected.extend(ids.iter().cloned());
        debug!(?scope, count = ids.len(), "Selected all");
        ids.len()
    }

    pub fn clear(&mut self) {
        self.state.selected.clear();
        self.anchor = None;
    }

    pub fn is_selected(&self, id: &RowId) -> bool {
        self.state.selected.contains(id)
    }

    pub fn is_pinned(&self, id: &RowId) -> bool {
        self.state.pinned.contains(id)
    }

    pub fn is_favorite(&self, id: &RowId) -> bool {
        self.state.favorite.contains(id)
    }

    pub fn row_flags(&self, id: &RowId, editing: bool) -> RowFlags {
        RowFlags {
            selected: self.is_selected(id),
            pinned: self.is_pinned(id),
            favorite: self.is_favorite(id),
            editing,
        }
    }

    /// Selected ids that are present in `ordered_ids`, in that order
    pub fn selected_in(&self, ordered_ids: &[RowId]) -> Vec<RowId> {
        ordered_ids
            .iter()
            .filter(|id| self.state.selected.contains(*id))
            .cloned()
            .collect()
    }

    /// Drop ids that no longer exist in the table. Returns how many were dropped.
    pub fn prune(&mut self, table: &DataTable) -> usize {
        let before = self.total_marks();
        self.state.selected.retain(|id| table.contains(id));
        self.state.pinned.retain(|id| table.contains(id));
        self.state.favorite.retain(|id| table.contains(id));
        if self.anchor.as_ref().is_some_and(|id| !table.contains(id)) {
            self.anchor = None;
        }
        let dropped = before - self.total_marks();
        if dropped > 0 {
            debug!(dropped, "Pruned stale selection ids");
        }
        dropped
    }

    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            selected: self.state.selected.len(),
            pinned: self.state.pinned.len(),
            favorite: self.state.favorite.len(),
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn pinned(&self) -> &BTreeSet<RowId> {
        &self.state.pinned
    }

    pub fn anchor(&self) -> Option<&RowId> {
        self.anchor.as_ref()
    }

    /// Restore a snapshot (undo/redo or session restore)
    pub fn restore(&mut self, state: SelectionState) {
        self.state = state;
        self.anchor = None;
    }

    fn total_marks(&self) -> usize {
        self.state.selected.len() + self.state.pinned.len() + self.state.favorite.len()
    }
}
