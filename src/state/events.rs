//! Commands into the engine and the events it emits

use serde::Serialize;

use crate::core::edit_manager::{CellEdit, TxId};
use crate::core::selection_manager::{RangeSelection, SelectScope, SelectionSummary};
use crate::data::datatable::RowId;
use crate::data::filter::FilterCriterion;
use crate::data::sort::{SortCriterion, SortDirection};
use crate::error::EditError;

/// Everything the view layer can ask the engine to do
#[derive(Debug, Clone)]
pub enum Command {
    /// Global search text; empty clears it
    Search(String),

    /// Set or replace the filter on one column; an empty value removes it
    Filter(FilterCriterion),

    ClearFilters,

    /// Replace the whole sort list
    Sort(Vec<SortCriterion>),

    /// Header click: cycle asc, desc, off (honors the configured sort mode)
    ToggleSort(String),

    GroupBy(Option<String>),

    Select(SelectCommand),

    /// Begin an optimistic cell edit; commit is async and goes through `GridEngine::commit`
    Edit(CellEdit),

    CancelEdit(TxId),

    Delete(Vec<RowId>),

    Undo,

    Redo,

    /// 1-based page index, clamped to the available pages
    Page(usize),

    /// Changes the page size and returns to page 1
    PageSize(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectCommand {
    Toggle(RowId),
    Range { anchor: RowId, target: RowId },
    /// Range from the last toggled row
    ExtendTo(RowId),
    All(SelectScope),
    Clear,
    TogglePin(RowId),
    ToggleFavorite(RowId),
}

/// What a dispatched command did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Applied,
    /// Valid command that changed nothing (undo at the oldest entry, ...)
    Unchanged,
    SortChanged(Option<SortDirection>),
    Range(RangeSelection),
    Selected(usize),
    EditStarted(TxId),
    Deleted(usize),
    /// The command was refused; state is untouched
    Rejected(EditError),
}

impl DispatchOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, DispatchOutcome::Rejected(_))
    }
}

/// Notifications sent to subscribers after each state transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StateEvent {
    QueryChanged {
        search: String,
        filters: usize,
        sorts: usize,
        group_by: Option<String>,
    },

    PageChanged {
        page_index: usize,
        page_size: usize,
    },

    SelectionChanged(SelectionSummary),

    EditStarted {
        tx: TxId,
        row_id: RowId,
        field: String,
    },

    EditCommitted {
        tx: TxId,
        row_id: RowId,
        field: String,
    },

    EditRolledBack {
        tx: TxId,
        row_id: RowId,
        field: String,
        reason: String,
    },

    RowsDeleted {
        count: usize,
    },

    HistoryRecorded {
        pointer: usize,
        len: usize,
        description: String,
    },

    HistoryMoved {
        pointer: usize,
        can_undo: bool,
        can_redo: bool,
    },

    UndoNoticeShown {
        description: String,
    },

    UndoNoticeExpired,

    DataReplaced {
        rows: usize,
    },

    SessionRestored {
        key: String,
    },
}
