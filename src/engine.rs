//! The engine facade
//!
//! `GridEngine` owns the dataset and every piece of interaction state around
//! it. Views issue `Command`s through `dispatch`, read the derived view with
//! `compute_view`, and hear about transitions through subscribers. All
//! mutation funnels through here so subscribers always see a consistent
//! sequence of events.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::Range;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::config::config::{EngineConfig, Windowing};
use crate::core::edit_manager::{
    BulkBegin, BulkReport, CellEdit, CommitOutcome, CommitTicket, EditManager, TxId,
};
use crate::core::history_manager::HistoryManager;
use crate::core::selection_manager::{
    RowFlags, ScopedRows, SelectionManager, SelectionState, SelectionSummary,
};
use crate::core::undo_notice::{UndoNotice, UndoNoticeSlot};
use crate::data::column::ColumnSet;
use crate::data::data_exporter::{ExportBatch, ExportFormat, RowExporter};
use crate::data::data_view::DataView;
use crate::data::datatable::{DataRow, DataTable, RowId};
use crate::data::grouping::{self, RowGroup};
use crate::data::pagination::{PageSlice, Pager};
use crate::data::query_engine::{PipelineDiagnostics, QueryEngine, QueryState, SavedQuery};
use crate::data::sort::SortMode;
use crate::error::{EditError, PersistenceError};
use crate::persistence::{AcceptAllPersister, MemorySessionStore, RowPersister, SessionStore};
use crate::state::dispatcher::{StateDispatcher, StateSubscriber, SubscriptionId};
use crate::state::events::{Command, DispatchOutcome, SelectCommand, StateEvent};
use crate::ui::viewport_manager::{ViewportManager, WindowRange};
use crate::utils::clock::{Clock, SystemClock};
use crate::{trace_command, trace_query};

/// What undo/redo restores: resolved row values plus the marking sets
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub rows: Vec<DataRow>,
    pub selection: SelectionState,
}

/// One materialized row of the computed view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    /// Position in the full ordered output
    pub index: usize,
    pub id: RowId,
    pub row: DataRow,
    pub flags: RowFlags,
}

/// Everything a view layer needs to paint the current state
#[derive(Debug, Clone)]
pub struct ComputedView {
    /// Rows of the current page (paged) or window (virtual)
    pub rows: Vec<ViewRow>,
    /// Rows matching search and filters, before paging
    pub total_count: usize,
    pub page: Option<PageSlice>,
    pub window: Option<WindowRange>,
    pub groups: Vec<RowGroup>,
    /// Footer aggregates over every matching row
    pub aggregates: BTreeMap<String, f64>,
    pub diagnostics: PipelineDiagnostics,
}

/// Which rows an export covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    /// Every row matching the query, in view order
    Filtered,
    /// Selected rows that match the query, in view order
    Selected,
    /// The current page or window
    Page,
}

/// Session blob kept in the `SessionStore`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedSession {
    pub query: SavedQuery,
    pub page_index: usize,
    pub page_size: usize,
    pub selection: SelectionState,
}

pub struct GridEngineBuilder {
    table: DataTable,
    columns: ColumnSet,
    config: EngineConfig,
    clock: Option<Rc<dyn Clock>>,
    persister: Option<Rc<dyn RowPersister>>,
    sessions: Option<Box<dyn SessionStore>>,
    pinned_first: bool,
}

impl GridEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn persister(mut self, persister: Rc<dyn RowPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn session_store(mut self, store: Box<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Keep pinned rows at the top of the ordered output (on by default)
    pub fn pinned_first(mut self, enabled: bool) -> Self {
        self.pinned_first = enabled;
        self
    }

    pub fn build(self) -> GridEngine {
        let clock = self.clock.unwrap_or_else(|| Rc::new(SystemClock));
        let config = self.config;

        let query = QueryState {
            search_mode: config.query.search_mode,
            ..QueryState::default()
        };
        let selection = SelectionManager::new();
        let initial = EngineSnapshot {
            rows: self.table.rows().to_vec(),
            selection: selection.state().clone(),
        };
        let history = HistoryManager::new(
            initial,
            config.history.history_config(),
            Rc::clone(&clock),
        );

        info!(
            table = %self.table.name,
            rows = self.table.len(),
            columns = self.columns.len(),
            windowing = ?config.pagination.windowing,
            "Grid engine ready"
        );

        GridEngine {
            table: self.table,
            columns: self.columns,
            query,
            query_engine: QueryEngine::new(),
            sort_mode: config.query.sort_mode,
            windowing: config.pagination.windowing,
            pager: Pager::new(config.pagination.page_size),
            viewport: ViewportManager::new(
                config.virtualization.viewport_height,
                config.virtualization.estimated_row_height,
                config.virtualization.overscan,
            ),
            selection,
            edits: EditManager::new(Rc::clone(&clock)),
            history,
            notice: UndoNoticeSlot::new(config.history.undo_notice_ms, Rc::clone(&clock)),
            dispatcher: StateDispatcher::new(),
            persister: self
                .persister
                .unwrap_or_else(|| Rc::new(AcceptAllPersister)),
            sessions: self
                .sessions
                .unwrap_or_else(|| Box::new(MemorySessionStore::new())),
            clock,
            pinned_first: self.pinned_first,
        }
    }
}

pub struct GridEngine {
    table: DataTable,
    columns: ColumnSet,
    query: QueryState,
    query_engine: QueryEngine,
    sort_mode: SortMode,
    windowing: Windowing,
    pager: Pager,
    viewport: ViewportManager,
    selection: SelectionManager,
    edits: EditManager,
    history: HistoryManager<EngineSnapshot>,
    notice: UndoNoticeSlot,
    dispatcher: StateDispatcher,
    persister: Rc<dyn RowPersister>,
    sessions: Box<dyn SessionStore>,
    clock: Rc<dyn Clock>,
    pinned_first: bool,
}

/// Run the pipeline over borrowed parts so callers can keep mutating the
/// pager and viewport while the view is alive
fn pipeline<'a>(
    table: &'a DataTable,
    columns: &ColumnSet,
    query: &QueryState,
    engine: &QueryEngine,
    pinned: Option<&BTreeSet<RowId>>,
) -> DataView<'a> {
    let view = DataView::from_query(table, columns, query, engine);
    match pinned {
        Some(pinned) => view.pinned_first(pinned),
        None => view,
    }
}

/// Range of the ordered output currently on screen
fn visible_range(
    windowing: Windowing,
    pager: &mut Pager,
    viewport: &mut ViewportManager,
    ordered_ids: &[RowId],
) -> Range<usize> {
    match windowing {
        Windowing::Paged => pager.slice(ordered_ids.len()).range,
        Windowing::Virtual => viewport.compute(ordered_ids).rows,
    }
}

impl GridEngine {
    pub fn builder(table: DataTable, columns: ColumnSet) -> GridEngineBuilder {
        GridEngineBuilder {
            table,
            columns,
            config: EngineConfig::default(),
            clock: None,
            persister: None,
            sessions: None,
            pinned_first: true,
        }
    }

    /// Engine with default config, wall clock, an accept-all persister and
    /// an in-memory session store
    pub fn new(table: DataTable, columns: ColumnSet) -> Self {
        Self::builder(table, columns).build()
    }

    // ========== Commands ==========

    pub fn dispatch(&mut self, command: Command) -> DispatchOutcome {
        trace_command!(&command);
        match command {
            Command::Search(text) => {
                if self.query.search == text {
                    return DispatchOutcome::Unchanged;
                }
                self.query.search = text;
                self.query_changed()
            }
            Command::Filter(criterion) => {
                if !self.query.filters.set(criterion) {
                    return DispatchOutcome::Unchanged;
                }
                self.query_changed()
            }
            Command::ClearFilters => {
                if self.query.filters.is_empty() {
                    return DispatchOutcome::Unchanged;
                }
                self.query.filters.clear();
                self.query_changed()
            }
            Command::Sort(criteria) => {
                self.query.sorts = criteria.into_iter().collect();
                self.query_changed()
            }
            Command::ToggleSort(column) => {
                if !self.columns.get(&column).is_some_and(|c| c.sortable) {
                    warn!(target: "query", column = %column, "Ignoring sort toggle on unsortable column");
                    return DispatchOutcome::Unchanged;
                }
                let direction = self.query.sorts.toggle(&column, self.sort_mode);
                self.query_changed();
                DispatchOutcome::SortChanged(direction)
            }
            Command::GroupBy(group_by) => {
                if self.query.group_by == group_by {
                    return DispatchOutcome::Unchanged;
                }
                self.query.group_by = group_by;
                self.query_changed()
            }
            Command::Select(select) => self.apply_selection(select),
            Command::Edit(edit) => self.begin_edit(edit),
            Command::CancelEdit(tx) => match self.edits.cancel(&mut self.table, tx) {
                Ok(transaction) => {
                    self.emit(StateEvent::EditRolledBack {
                        tx,
                        row_id: transaction.row_id,
                        field: transaction.field,
                        reason: "cancelled".to_string(),
                    });
                    DispatchOutcome::Applied
                }
                Err(err) => DispatchOutcome::Rejected(err),
            },
            Command::Delete(ids) => self.delete_rows(&ids),
            Command::Undo => self.step_history(true),
            Command::Redo => self.step_history(false),
            Command::Page(page_index) => {
                let total = self.ordered_ids().len();
                let before = self.pager.page_index();
                if self.pager.set_page(page_index, total) == before {
                    return DispatchOutcome::Unchanged;
                }
                self.emit_page_changed();
                DispatchOutcome::Applied
            }
            Command::PageSize(page_size) => {
                let before = (self.pager.page_index(), self.pager.page_size());
                self.pager.set_page_size(page_size);
                if (self.pager.page_index(), self.pager.page_size()) == before {
                    return DispatchOutcome::Unchanged;
                }
                self.emit_page_changed();
                DispatchOutcome::Applied
            }
        }
    }

    fn query_changed(&mut self) -> DispatchOutcome {
        self.pager.reset();
        if self.windowing == Windowing::Virtual {
            let ids = self.ordered_ids();
            self.viewport.rebase(&ids);
        }
        self.emit(StateEvent::QueryChanged {
            search: self.query.search.clone(),
            filters: self.query.filters.len(),
            sorts: self.query.sorts.criteria().len(),
            group_by: self.query.group_by.clone(),
        });
        DispatchOutcome::Applied
    }

    fn apply_selection(&mut self, command: SelectCommand) -> DispatchOutcome {
        let before = self.selection.state().clone();
        let outcome = match command {
            SelectCommand::Toggle(id) => {
                if !self.table.contains(&id) {
                    return DispatchOutcome::Unchanged;
                }
                self.selection.toggle_select(&id);
                DispatchOutcome::Applied
            }
            SelectCommand::Range { anchor, target } => {
                let ordered = self.ordered_ids();
                DispatchOutcome::Range(self.selection.select_range(&anchor, &target, &ordered))
            }
            SelectCommand::ExtendTo(target) => {
                let ordered = self.ordered_ids();
                match self.selection.extend_to(&target, &ordered) {
                    Some(range) => DispatchOutcome::Range(range),
                    None => return DispatchOutcome::Unchanged,
                }
            }
            SelectCommand::All(scope) => {
                let ordered = self.ordered_ids();
                let range = visible_range(
                    self.windowing,
                    &mut self.pager,
                    &mut self.viewport,
                    &ordered,
                );
                let rows = ScopedRows {
                    page: &ordered[range],
                    filtered: &ordered,
                    dataset: self.table.ids(),
                };
                DispatchOutcome::Selected(self.selection.select_all(scope, &rows))
            }
            SelectCommand::Clear => {
                self.selection.clear();
                DispatchOutcome::Applied
            }
            SelectCommand::TogglePin(id) => {
                if !self.table.contains(&id) {
                    return DispatchOutcome::Unchanged;
                }
                self.selection.toggle_pin(&id);
                DispatchOutcome::Applied
            }
            SelectCommand::ToggleFavorite(id) => {
                if !self.table.contains(&id) {
                    return DispatchOutcome::Unchanged;
                }
                self.selection.toggle_favorite(&id);
                DispatchOutcome::Applied
            }
        };

        if *self.selection.state() == before {
            return match outcome {
                DispatchOutcome::Range(_) | DispatchOutcome::Selected(_) => outcome,
                _ => DispatchOutcome::Unchanged,
            };
        }
        let snapshot = self.snapshot();
        self.history.record(snapshot, "Selection changed");
        self.emit(StateEvent::SelectionChanged(self.selection.summary()));
        outcome
    }

    fn begin_edit(&mut self, edit: CellEdit) -> DispatchOutcome {
        match self.edits.begin_edit(
            &mut self.table,
            &self.columns,
            &edit.row_id,
            &edit.field,
            edit.value,
        ) {
            Ok(tx) => {
                self.emit(StateEvent::EditStarted {
                    tx,
                    row_id: edit.row_id,
                    field: edit.field,
                });
                DispatchOutcome::EditStarted(tx)
            }
            Err(err) => {
                debug!(row = %edit.row_id, field = %edit.field, error = %err, "Edit rejected");
                DispatchOutcome::Rejected(err)
            }
        }
    }

    fn delete_rows(&mut self, ids: &[RowId]) -> DispatchOutcome {
        self.edits.drop_rows(ids);
        let removed = self.table.remove(ids);
        if removed.is_empty() {
            return DispatchOutcome::Unchanged;
        }
        let count = removed.len();
        for id in ids {
            self.viewport.forget(id);
        }
        let pruned = self.selection.prune(&self.table);

        let description = if count == 1 {
            "Deleted 1 row".to_string()
        } else {
            format!("Deleted {} rows", count)
        };
        let snapshot = self.snapshot();
        let seq = self.history.record_immediate(snapshot, description.clone());
        self.notice.announce(description.clone(), seq);
        info!(count, "Rows deleted");

        if self.windowing == Windowing::Virtual {
            let ordered = self.ordered_ids();
            self.viewport.rebase(&ordered);
        }
        self.emit(StateEvent::RowsDeleted { count });
        self.emit_history_recorded();
        if pruned > 0 {
            self.emit(StateEvent::SelectionChanged(self.selection.summary()));
        }
        self.emit(StateEvent::UndoNoticeShown { description });
        DispatchOutcome::Deleted(count)
    }

    fn step_history(&mut self, backwards: bool) -> DispatchOutcome {
        self.history.flush();
        let target = if backwards {
            self.history.undo_target()
        } else {
            self.history.redo_target()
        };
        let Some(snapshot) = target.cloned() else {
            return DispatchOutcome::Unchanged;
        };
        // Nothing moves unless the snapshot can be restored
        if let Err(err) = self.table.check_rows(&snapshot.rows) {
            warn!(error = %err, "History snapshot could not be restored");
            return DispatchOutcome::Unchanged;
        }
        if backwards {
            self.history.undo();
        } else {
            self.history.redo();
        }

        let rolled_back = self.edits.rollback_all(&mut self.table);
        if rolled_back > 0 {
            info!(rolled_back, "Rolled back pending edits before history move");
        }
        if let Err(err) = self.table.replace_rows(snapshot.rows) {
            warn!(error = %err, "History snapshot rejected after check");
            return DispatchOutcome::Unchanged;
        }
        self.selection.restore(snapshot.selection);
        if self.windowing == Windowing::Virtual {
            let ordered = self.ordered_ids();
            self.viewport.rebase(&ordered);
        }

        let pointer = self.history.pointer();
        let current_seq = self.history.current().seq;
        if self
            .notice
            .current()
            .is_some_and(|notice| current_seq < notice.entry_seq)
        {
            self.notice.dismiss();
        }
        debug!(pointer, backwards, "History moved");
        self.emit(StateEvent::HistoryMoved {
            pointer,
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
        DispatchOutcome::Applied
    }

    /// Undo the delete announced by the current notice. Does nothing once the
    /// notice expired or history moved past the delete.
    pub fn undo_last_delete(&mut self) -> DispatchOutcome {
        let Some(notice) = self.notice.take_for_undo() else {
            return DispatchOutcome::Unchanged;
        };
        if self.history.has_pending() || self.history.current().seq != notice.entry_seq {
            info!(description = %notice.description, "Undo notice no longer matches history");
            return DispatchOutcome::Unchanged;
        }
        self.dispatch(Command::Undo)
    }

    // ========== Edits ==========

    /// Persist a pending edit. Failure restores the old value and is
    /// reported as `CommitOutcome::RolledBack`; unknown or already
    /// committing transactions are errors.
    pub async fn commit(&mut self, tx: TxId) -> Result<CommitOutcome, EditError> {
        let ticket = self.edits.begin_commit(tx)?;
        let persister = Rc::clone(&self.persister);
        let result = persister
            .save(&ticket.row_id, &ticket.field, &ticket.value)
            .await;
        Ok(self.resolve_commit(&ticket, result))
    }

    /// First half of `commit` for hosts that drive the persister themselves
    pub fn begin_commit(&mut self, tx: TxId) -> Result<CommitTicket, EditError> {
        self.edits.begin_commit(tx)
    }

    /// Second half of `commit`. Tickets whose transaction was superseded or
    /// cancelled meanwhile resolve as `Stale` and change nothing.
    pub fn resolve_commit(
        &mut self,
        ticket: &CommitTicket,
        result: Result<(), PersistenceError>,
    ) -> CommitOutcome {
        let outcome = self.edits.resolve_commit(&mut self.table, ticket, result);
        match &outcome {
            CommitOutcome::Committed(transaction) => {
                let snapshot = self.snapshot();
                self.history.record(
                    snapshot,
                    format!("Edited {} on row {}", transaction.field, transaction.row_id),
                );
                self.emit(StateEvent::EditCommitted {
                    tx: transaction.id,
                    row_id: transaction.row_id.clone(),
                    field: transaction.field.clone(),
                });
            }
            CommitOutcome::RolledBack { transaction, error } => {
                warn!(
                    tx = %transaction.id,
                    row = %transaction.row_id,
                    field = %transaction.field,
                    error = %error,
                    "Commit failed, restored previous value"
                );
                self.emit(StateEvent::EditRolledBack {
                    tx: transaction.id,
                    row_id: transaction.row_id.clone(),
                    field: transaction.field.clone(),
                    reason: error.to_string(),
                });
            }
            CommitOutcome::Stale(tx) => {
                debug!(tx = %tx, "Ignoring stale commit result");
            }
        }
        outcome
    }

    /// Start several edits at once; invalid ones are reported, the rest are pending
    pub fn begin_bulk(&mut self, edits: Vec<CellEdit>) -> BulkBegin {
        let begun = self.edits.begin_bulk(&mut self.table, &self.columns, edits);
        let started: Vec<StateEvent> = begun
            .started
            .iter()
            .filter_map(|id| self.edits.get(*id))
            .map(|tx| StateEvent::EditStarted {
                tx: tx.id,
                row_id: tx.row_id.clone(),
                field: tx.field.clone(),
            })
            .collect();
        for event in started {
            self.emit(event);
        }
        begun
    }

    /// Commit every pending edit. Successes stay even when others fail.
    pub async fn commit_all(&mut self) -> BulkReport {
        let tickets = self.edits.begin_commit_all();
        let persister = Rc::clone(&self.persister);
        let mut report = BulkReport::default();
        for ticket in tickets {
            let result = persister
                .save(&ticket.row_id, &ticket.field, &ticket.value)
                .await;
            let outcome = self.resolve_commit(&ticket, result);
            report.record(&outcome);
        }
        info!(
            committed = report.committed.len(),
            failed = report.failed.len(),
            stale = report.stale.len(),
            "Bulk commit finished"
        );
        report
    }

    // ========== Timers ==========

    /// Fire due timers: the history debounce and the undo notice expiry.
    /// Returns true when anything changed.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        if self.history.poll() {
            self.emit_history_recorded();
            changed = true;
        }
        if let Some(notice) = self.notice.poll() {
            debug!(description = %notice.description, "Undo notice expired");
            self.emit(StateEvent::UndoNoticeExpired);
            changed = true;
        }
        changed
    }

    // ========== Views ==========

    pub fn compute_view(&mut self) -> ComputedView {
        trace_query!(format!(
            "search='{}' filters={} sorts={} group_by={:?}",
            self.query.search,
            self.query.filters.len(),
            self.query.sorts.criteria().len(),
            self.query.group_by
        ));
        let pinned = self.pinned_first.then(|| self.selection.pinned());
        let view = pipeline(
            &self.table,
            &self.columns,
            &self.query,
            &self.query_engine,
            pinned,
        );
        let ordered = view.ordered_rows();
        let total_count = ordered.len();

        let (range, page, window) = match self.windowing {
            Windowing::Paged => {
                let slice = self.pager.slice(total_count);
                (slice.range.clone(), Some(slice), None)
            }
            Windowing::Virtual => {
                let ids: Vec<RowId> = ordered.iter().map(|(id, _)| (*id).clone()).collect();
                let window = self.viewport.compute(&ids);
                (window.rows.clone(), None, Some(window))
            }
        };

        let rows = range
            .filter_map(|index| {
                let (id, row) = ordered.get(index)?;
                Some(ViewRow {
                    index,
                    id: (*id).clone(),
                    row: (*row).clone(),
                    flags: self.selection.row_flags(id, self.edits.is_editing(id)),
                })
            })
            .collect();

        ComputedView {
            rows,
            total_count,
            page,
            window,
            groups: view.groups().to_vec(),
            aggregates: grouping::aggregate(ordered.iter().map(|(_, row)| *row), &self.columns),
            diagnostics: view.diagnostics().clone(),
        }
    }

    /// Ids of every row matching the query, in view order
    pub fn ordered_ids(&self) -> Vec<RowId> {
        let pinned = self.pinned_first.then(|| self.selection.pinned());
        pipeline(
            &self.table,
            &self.columns,
            &self.query,
            &self.query_engine,
            pinned,
        )
        .ordered_ids()
    }

    /// Selected rows that match the query, in view order
    pub fn selected_ids(&self) -> Vec<RowId> {
        self.selection.selected_in(&self.ordered_ids())
    }

    pub fn row_flags(&self, id: &RowId) -> RowFlags {
        self.selection.row_flags(id, self.edits.is_editing(id))
    }

    pub fn selection_summary(&self) -> SelectionSummary {
        self.selection.summary()
    }

    // ========== Export ==========

    /// Hand the authoritative rows for `scope` to `exporter`
    pub fn export(
        &mut self,
        format: ExportFormat,
        scope: ExportScope,
        exporter: &dyn RowExporter,
    ) -> Result<String> {
        let pinned = self.pinned_first.then(|| self.selection.pinned());
        let view = pipeline(
            &self.table,
            &self.columns,
            &self.query,
            &self.query_engine,
            pinned,
        );
        let ordered = view.ordered_rows();

        let rows = match scope {
            ExportScope::Filtered => ordered,
            ExportScope::Selected => ordered
                .into_iter()
                .filter(|(id, _)| self.selection.is_selected(id))
                .collect(),
            ExportScope::Page => {
                let ids: Vec<RowId> = ordered.iter().map(|(id, _)| (*id).clone()).collect();
                let range = visible_range(
                    self.windowing,
                    &mut self.pager,
                    &mut self.viewport,
                    &ids,
                );
                ordered[range].to_vec()
            }
        };

        let batch = ExportBatch {
            columns: self.columns.display_order(),
            rows,
        };
        info!(rows = batch.len(), ?scope, ?format, "Exporting rows");
        exporter.export_rows(&batch, format)
    }

    // ========== Sessions ==========

    /// Store query, page and marking sets under `key`
    pub fn save_session(&mut self, key: &str) -> Result<(), PersistenceError> {
        let session = SavedSession {
            query: SavedQuery::from(&self.query),
            page_index: self.pager.page_index(),
            page_size: self.pager.page_size(),
            selection: self.selection.state().clone(),
        };
        let blob =
            serde_json::to_value(&session).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        self.sessions.set(key, blob)?;
        debug!(key, "Session saved");
        Ok(())
    }

    /// Restore a session saved under `key`. Returns false when nothing was stored.
    pub fn restore_session(&mut self, key: &str) -> Result<bool, PersistenceError> {
        let Some(blob) = self.sessions.get(key)? else {
            return Ok(false);
        };
        let session: SavedSession =
            serde_json::from_value(blob).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;

        self.query = QueryState::from(session.query);
        self.selection.restore(session.selection);
        self.pager = Pager::new(session.page_size);
        let total = self.ordered_ids().len();
        self.pager.set_page(session.page_index, total);

        info!(key, "Session restored");
        self.emit(StateEvent::SessionRestored {
            key: key.to_string(),
        });
        self.emit(StateEvent::QueryChanged {
            search: self.query.search.clone(),
            filters: self.query.filters.len(),
            sorts: self.query.sorts.criteria().len(),
            group_by: self.query.group_by.clone(),
        });
        self.emit_page_changed();
        self.emit(StateEvent::SelectionChanged(self.selection.summary()));
        Ok(true)
    }

    // ========== Data and configuration ==========

    /// Swap in a new dataset. Pending edits are dropped and history restarts
    /// from the new rows.
    pub fn replace_data(&mut self, table: DataTable) {
        self.edits = EditManager::new(Rc::clone(&self.clock));
        self.table = table;
        self.selection.prune(&self.table);
        self.notice.dismiss();
        let snapshot = self.snapshot();
        self.history.clear(snapshot);
        self.pager.reset();
        let ordered = self.ordered_ids();
        self.viewport.rebase(&ordered);
        self.emit(StateEvent::DataReplaced {
            rows: self.table.len(),
        });
    }

    /// Replace the column set wholesale
    pub fn set_columns(&mut self, columns: ColumnSet) {
        debug!(columns = columns.len(), "Column set replaced");
        self.columns = columns;
    }

    pub fn set_windowing(&mut self, windowing: Windowing) {
        self.windowing = windowing;
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
    }

    // ========== Subscribers ==========

    pub fn subscribe(&mut self, subscriber: Box<dyn StateSubscriber>) -> SubscriptionId {
        self.dispatcher.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    pub fn event_history(&self) -> impl Iterator<Item = &StateEvent> {
        self.dispatcher.get_event_history()
    }

    // ========== Accessors ==========

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn edits(&self) -> &EditManager {
        &self.edits
    }

    pub fn history(&self) -> &HistoryManager<EngineSnapshot> {
        &self.history
    }

    pub fn undo_notice(&self) -> Option<&UndoNotice> {
        self.notice.current()
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn windowing(&self) -> Windowing {
        self.windowing
    }

    /// For hosts reporting viewport size, scroll position and row heights
    pub fn viewport_mut(&mut self) -> &mut ViewportManager {
        &mut self.viewport
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========== Internals ==========

    /// Current rows with pending optimistic values swapped back to their
    /// old values, plus the marking sets
    fn snapshot(&self) -> EngineSnapshot {
        let mut rows = self.table.rows().to_vec();
        for tx in self.edits.active_transactions() {
            if let Some(pos) = self.table.position(&tx.row_id) {
                rows[pos].set(tx.field.clone(), tx.old_value.clone());
            }
        }
        EngineSnapshot {
            rows,
            selection: self.selection.state().clone(),
        }
    }

    fn emit(&mut self, event: StateEvent) {
        self.dispatcher.dispatch(event);
    }

    fn emit_history_recorded(&mut self) {
        let event = StateEvent::HistoryRecorded {
            pointer: self.history.pointer(),
            len: self.history.len(),
            description: self.history.current().description.clone(),
        };
        self.emit(event);
    }

    fn emit_page_changed(&mut self) {
        self.emit(StateEvent::PageChanged {
            page_index: self.pager.page_index(),
            page_size: self.pager.page_size(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::selection_manager::{RangeSelection, SelectScope};
    use crate::data::column::{ColumnDef, ColumnType};
    use crate::data::data_exporter::DataExporter;
    use crate::data::datatable::DataValue;
    use crate::data::filter::{FilterCriterion, FilterOperator};
    use crate::data::sort::{SortCriterion, SortDirection};
    use crate::persistence::MemoryPersister;
    use crate::state::dispatcher::FnSubscriber;
    use crate::utils::clock::ManualClock;
    use std::cell::RefCell;

    fn people() -> (DataTable, ColumnSet) {
        let mut table = DataTable::keyed_by("people", "id");
        let rows = [
            (1, "Ada", "Engineering", 120),
            (2, "Bob", "Sales", 80),
            (3, "Cy", "Engineering", 95),
            (4, "Di", "Support", 70),
            (5, "Ed", "Engineering", 110),
        ];
        for (id, name, dept, salary) in rows {
            table
                .insert(
                    DataRow::new()
                        .with("id", id as i64)
                        .with("name", name)
                        .with("dept", dept)
                        .with("salary", salary as i64)
                        .with("status", "Active"),
                )
                .unwrap();
        }
        let columns = ColumnSet::new(vec![
            ColumnDef::new("id", ColumnType::Number),
            ColumnDef::new("name", ColumnType::Text).editable(true),
            ColumnDef::new("dept", ColumnType::Text),
            ColumnDef::new("salary", ColumnType::Number).editable(true),
            ColumnDef::new("status", ColumnType::Select)
                .editable(true)
                .with_options::<Vec<String>, String>(vec!["Active".into(), "Inactive".into()]),
        ]);
        (table, columns)
    }

    fn engine_with(persister: Rc<MemoryPersister>) -> (GridEngine, ManualClock) {
        let (table, columns) = people();
        let clock = ManualClock::new();
        let engine = GridEngine::builder(table, columns)
            .clock(Rc::new(clock.clone()))
            .persister(persister)
            .build();
        (engine, clock)
    }

    fn ids(values: &[i64]) -> Vec<RowId> {
        values.iter().map(|v| RowId::Number(*v)).collect()
    }

    #[test]
    fn test_query_commands_reset_page_and_notify() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        engine.subscribe(Box::new(FnSubscriber::new("test", move |e: &StateEvent| {
            sink.borrow_mut().push(e.clone())
        })));

        engine.dispatch(Command::PageSize(2));
        engine.dispatch(Command::Page(2));
        assert_eq!(engine.pager().page_index(), 2);

        let outcome = engine.dispatch(Command::Filter(FilterCriterion::new(
            "dept",
            FilterOperator::Equals,
            "engineering",
        )));
        assert_eq!(outcome, DispatchOutcome::Applied);
        assert_eq!(engine.pager().page_index(), 1);
        assert_eq!(
            engine.dispatch(Command::ToggleSort("salary".into())),
            DispatchOutcome::SortChanged(Some(SortDirection::Asc))
        );
        assert_eq!(engine.ordered_ids(), ids(&[3, 5, 1]));

        assert!(seen.borrow().iter().any(|e| matches!(
            e,
            StateEvent::QueryChanged { filters: 1, sorts: 1, .. }
        )));
        assert_eq!(
            engine.dispatch(Command::Search(String::new())),
            DispatchOutcome::Unchanged
        );
    }

    #[test]
    fn test_compute_view_pages_and_flags() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        engine.dispatch(Command::PageSize(2));
        engine.dispatch(Command::Select(SelectCommand::Toggle(RowId::Number(4))));
        engine.dispatch(Command::Select(SelectCommand::TogglePin(RowId::Number(4))));

        let view = engine.compute_view();
        assert_eq!(view.total_count, 5);
        assert_eq!(view.page.as_ref().unwrap().total_pages, 3);
        let first = &view.rows[0];
        assert_eq!(first.id, RowId::Number(4));
        assert!(first.flags.pinned && first.flags.selected);
        assert_eq!(view.rows[1].id, RowId::Number(1));
    }

    #[test]
    fn test_range_selection_is_symmetric() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        let forward = engine.dispatch(Command::Select(SelectCommand::Range {
            anchor: RowId::Number(2),
            target: RowId::Number(4),
        }));
        let forward_ids = engine.selected_ids();
        engine.dispatch(Command::Select(SelectCommand::Clear));
        engine.dispatch(Command::Select(SelectCommand::Range {
            anchor: RowId::Number(4),
            target: RowId::Number(2),
        }));
        assert_eq!(forward, DispatchOutcome::Range(RangeSelection::Selected(3)));
        assert_eq!(engine.selected_ids(), forward_ids);
    }

    #[test]
    fn test_select_all_scopes() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        engine.dispatch(Command::PageSize(2));
        engine.dispatch(Command::Search("engineering".into()));

        assert_eq!(
            engine.dispatch(Command::Select(SelectCommand::All(SelectScope::Page))),
            DispatchOutcome::Selected(2)
        );
        engine.dispatch(Command::Select(SelectCommand::All(SelectScope::Filtered)));
        assert_eq!(engine.selection_summary().selected, 3);
        engine.dispatch(Command::Select(SelectCommand::All(SelectScope::Dataset)));
        assert_eq!(engine.selection_summary().selected, 5);
    }

    #[tokio::test]
    async fn test_failed_commit_reverts_and_skips_history() {
        let persister = Rc::new(MemoryPersister::new());
        persister.reject(1i64, "status", "read only");
        let (mut engine, clock) = engine_with(persister.clone());

        let DispatchOutcome::EditStarted(tx) =
            engine.dispatch(Command::Edit(CellEdit::new(1i64, "status", "Inactive")))
        else {
            panic!("edit should start");
        };
        assert_eq!(
            engine.table().get(&RowId::Number(1)).unwrap().get("status"),
            &DataValue::from("Inactive")
        );

        let outcome = engine.commit(tx).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::RolledBack { .. }));
        assert_eq!(
            engine.table().get(&RowId::Number(1)).unwrap().get("status"),
            &DataValue::from("Active")
        );

        clock.advance_ms(1000);
        engine.tick();
        assert_eq!(engine.history().len(), 1);
        assert!(!engine.can_undo());
    }

    #[tokio::test]
    async fn test_rapid_commits_collapse_into_one_entry() {
        let persister = Rc::new(MemoryPersister::new());
        let (mut engine, clock) = engine_with(persister.clone());

        for salary in [100i64, 101, 102, 103, 104] {
            let DispatchOutcome::EditStarted(tx) =
                engine.dispatch(Command::Edit(CellEdit::new(2i64, "salary", salary)))
            else {
                panic!("edit should start");
            };
            engine.commit(tx).await.unwrap();
            clock.advance_ms(50);
            engine.tick();
        }
        clock.advance_ms(300);
        assert!(engine.tick());
        assert_eq!(engine.history().len(), 2);
        assert_eq!(persister.saved().len(), 5);

        engine.dispatch(Command::Undo);
        assert_eq!(
            engine.table().get(&RowId::Number(2)).unwrap().get("salary"),
            &DataValue::Integer(80)
        );
        engine.dispatch(Command::Redo);
        assert_eq!(
            engine.table().get(&RowId::Number(2)).unwrap().get("salary"),
            &DataValue::Integer(104)
        );
    }

    #[tokio::test]
    async fn test_superseded_commit_resolves_stale() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        let DispatchOutcome::EditStarted(first) =
            engine.dispatch(Command::Edit(CellEdit::new(3i64, "name", "Cyd")))
        else {
            panic!("edit should start");
        };
        let ticket = engine.begin_commit(first).unwrap();
        engine.dispatch(Command::Edit(CellEdit::new(3i64, "name", "Cyril")));

        let outcome = engine.resolve_commit(&ticket, Ok(()));
        assert_eq!(outcome, CommitOutcome::Stale(first));
        assert_eq!(
            engine.table().get(&RowId::Number(3)).unwrap().get("name"),
            &DataValue::from("Cyril")
        );

        let report = engine.commit_all().await;
        assert!(report.is_complete_success());
        assert!(engine.edits().is_idle());
    }

    #[test]
    fn test_delete_undo_notice_and_expiry() {
        let (mut engine, clock) = engine_with(Rc::new(MemoryPersister::new()));
        engine.dispatch(Command::Select(SelectCommand::Toggle(RowId::Number(2))));

        assert_eq!(
            engine.dispatch(Command::Delete(ids(&[2, 4]))),
            DispatchOutcome::Deleted(2)
        );
        assert_eq!(engine.table().len(), 3);
        assert_eq!(engine.selection_summary().selected, 0);
        assert_eq!(engine.undo_notice().unwrap().description, "Deleted 2 rows");

        assert_eq!(engine.undo_last_delete(), DispatchOutcome::Applied);
        assert_eq!(engine.table().len(), 5);
        assert!(engine.selection().is_selected(&RowId::Number(2)));
        assert!(engine.undo_notice().is_none());

        engine.dispatch(Command::Delete(ids(&[1])));
        clock.advance_ms(5000);
        assert!(engine.tick());
        assert!(engine.undo_notice().is_none());
        assert_eq!(engine.undo_last_delete(), DispatchOutcome::Unchanged);
        assert_eq!(engine.table().len(), 4);
        assert_eq!(
            engine.event_history().last(),
            Some(&StateEvent::UndoNoticeExpired)
        );
    }

    #[test]
    fn test_unrestorable_snapshot_leaves_history_alone() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        let mut rows = engine.table().rows().to_vec();
        rows.push(rows[0].clone());
        let selection = engine.selection.state().clone();
        engine
            .history
            .record_immediate(EngineSnapshot { rows, selection }, "Duplicate ids");
        engine.dispatch(Command::Delete(ids(&[5])));

        let DispatchOutcome::EditStarted(tx) =
            engine.dispatch(Command::Edit(CellEdit::new(1i64, "name", "Ada L")))
        else {
            panic!("edit should start");
        };
        let pointer = engine.history().pointer();

        assert_eq!(engine.dispatch(Command::Undo), DispatchOutcome::Unchanged);
        assert_eq!(engine.history().pointer(), pointer);
        assert_eq!(engine.table().len(), 4);
        assert!(engine.edits().pending_for(&RowId::Number(1), "name").is_some());
        assert_eq!(
            engine.table().get(&RowId::Number(1)).unwrap().get("name"),
            &DataValue::from("Ada L")
        );
        assert!(engine.edits().active_transactions().any(|t| t.id == tx));
    }

    #[test]
    fn test_session_roundtrip() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        engine.dispatch(Command::Search("engineering".into()));
        engine.dispatch(Command::Sort(vec![SortCriterion::desc("salary")]));
        engine.dispatch(Command::Select(SelectCommand::ToggleFavorite(RowId::Number(5))));
        engine.save_session("main").unwrap();

        engine.dispatch(Command::Search(String::new()));
        engine.dispatch(Command::Select(SelectCommand::ToggleFavorite(RowId::Number(5))));
        assert!(!engine.restore_session("missing").unwrap());
        assert!(engine.restore_session("main").unwrap());

        assert_eq!(engine.query().search, "engineering");
        assert_eq!(engine.ordered_ids(), ids(&[1, 5, 3]));
        assert!(engine.selection().is_favorite(&RowId::Number(5)));
    }

    #[test]
    fn test_export_scopes() {
        let (mut engine, _) = engine_with(Rc::new(MemoryPersister::new()));
        engine.dispatch(Command::Sort(vec![SortCriterion::desc("salary")]));
        engine.dispatch(Command::Select(SelectCommand::Toggle(RowId::Number(3))));
        engine.dispatch(Command::Select(SelectCommand::Toggle(RowId::Number(2))));

        let csv = engine
            .export(ExportFormat::Csv, ExportScope::Selected, &DataExporter)
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("3,Cy"));
        assert!(lines[2].starts_with("2,Bob"));

        engine.dispatch(Command::PageSize(2));
        let json = engine
            .export(ExportFormat::Json, ExportScope::Page, &DataExporter)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["name"], "Ada");
    }
}
