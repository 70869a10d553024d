//! Inline cell edits with optimistic apply
//!
//! Each edit is a transaction `pending -> committing -> committed | rolled back`.
//! The new value is written into the table as soon as the edit begins. Commit
//! is split in two (`begin_commit`, `resolve_commit`) so the caller can await
//! the persister in between without holding any borrow; a resolution for a
//! transaction that was superseded or cancelled in the meantime is `Stale`
//! and leaves the table alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::data::column::{ColumnDef, ColumnSet, ColumnType};
use crate::data::datatable::{parse_instant, DataTable, DataValue, RowId};
use crate::error::{EditError, PersistenceError};
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Committing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditTransaction {
    pub id: TxId,
    pub row_id: RowId,
    pub field: String,
    pub old_value: DataValue,
    pub new_value: DataValue,
    pub status: TxStatus,
    pub started_at: DateTime<Utc>,
}

/// One requested cell change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEdit {
    pub row_id: RowId,
    pub field: String,
    pub value: DataValue,
}

impl CellEdit {
    pub fn new(row_id: impl Into<RowId>, field: impl Into<String>, value: impl Into<DataValue>) -> Self {
        Self {
            row_id: row_id.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// What the persister has to save for a committing transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CommitTicket {
    pub tx: TxId,
    pub row_id: RowId,
    pub field: String,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Persisted; the optimistic value stays
    Committed(EditTransaction),
    /// Persist failed; the old value was restored
    RolledBack {
        transaction: EditTransaction,
        error: EditError,
    },
    /// The transaction was superseded or cancelled before it resolved
    Stale(TxId),
}

/// Result of starting a batch of edits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkBegin {
    pub started: Vec<TxId>,
    pub rejected: Vec<(CellEdit, EditError)>,
}

/// Per-row result of a bulk commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub committed: Vec<TxId>,
    pub failed: Vec<(RowId, String, EditError)>,
    pub stale: Vec<TxId>,
}

impl BulkReport {
    pub fn record(&mut self, outcome: &CommitOutcome) {
        match outcome {
            CommitOutcome::Committed(tx) => self.committed.push(tx.id),
            CommitOutcome::RolledBack { transaction, error } => self.failed.push((
                transaction.row_id.clone(),
                transaction.field.clone(),
                error.clone(),
            )),
            CommitOutcome::Stale(id) => self.stale.push(*id),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.stale.is_empty()
    }
}

/// Check a proposed value against the column and normalize it to the
/// column's type (numeric strings become numbers and so on).
pub fn validate_value(column: &ColumnDef, value: DataValue) -> Result<DataValue, EditError> {
    if value.is_null() {
        return Ok(value);
    }
    let field = column.field.as_str();
    match column.column_type {
        ColumnType::Text => Ok(value),
        ColumnType::Number => match value {
            DataValue::Integer(_) | DataValue::Float(_) => Ok(value),
            DataValue::String(ref s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Ok(DataValue::Integer(i))
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    if f.is_finite() {
                        Ok(DataValue::Float(f))
                    } else {
                        Err(EditError::validation(field, format!("'{}' is not a number", s)))
                    }
                } else {
                    Err(EditError::validation(field, format!("'{}' is not a number", s)))
                }
            }
            other => Err(EditError::validation(
                field,
                format!("expected a number, got {:?}", other.data_type()),
            )),
        },
        ColumnType::Boolean => match value {
            DataValue::Boolean(_) => Ok(value),
            DataValue::String(ref s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Ok(DataValue::Boolean(true)),
                "false" | "no" => Ok(DataValue::Boolean(false)),
                _ => Err(EditError::validation(field, format!("'{}' is not a boolean", s))),
            },
            other => Err(EditError::validation(
                field,
                format!("expected a boolean, got {:?}", other.data_type()),
            )),
        },
        ColumnType::Date => match value {
            DataValue::DateTime(ref s) | DataValue::String(ref s) => {
                if parse_instant(s).is_some() {
                    Ok(DataValue::DateTime(s.clone()))
                } else {
                    Err(EditError::validation(field, format!("'{}' is not a date", s)))
                }
            }
            other => Err(EditError::validation(
                field,
                format!("expected a date, got {:?}", other.data_type()),
            )),
        },
        ColumnType::Select => {
            if column.options.is_empty() {
                return Ok(value);
            }
            let text = value.to_string();
            if column.options.iter().any(|o| *o == text) {
                Ok(value)
            } else {
                Err(EditError::validation(
                    field,
                    format!("'{}' is not one of {:?}", text, column.options),
                ))
            }
        }
    }
}

#[derive(Debug)]
pub struct EditManager {
    next_id: u64,
    transactions: BTreeMap<TxId, EditTransaction>,
    by_cell: HashMap<(RowId, String), TxId>,
    clock: Rc<dyn Clock>,
}

impl EditManager {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            next_id: 1,
            transactions: BTreeMap::new(),
            by_cell: HashMap::new(),
            clock,
        }
    }

    /// Validate and apply an edit optimistically. A transaction already open on
    /// the same cell is rolled back first and never persisted.
    pub fn begin_edit(
        &mut self,
        table: &mut DataTable,
        columns: &ColumnSet,
        row_id: &RowId,
        field: &str,
        value: DataValue,
    ) -> Result<TxId, EditError> {
        if !table.contains(row_id) {
            return Err(EditError::UnknownRow(row_id.clone()));
        }
        let column = columns
            .by_field(field)
            .or_else(|| columns.get(field))
            .ok_or_else(|| EditError::UnknownColumn(field.to_string()))?;
        if !column.editable {
            return Err(EditError::NotEditable(column.id.clone()));
        }
        let value = validate_value(column, value)?;
        let field = column.field.clone();

        let cell = (row_id.clone(), field.clone());
        if let Some(previous) = self.by_cell.get(&cell).copied() {
            info!(%previous, row = %row_id, field = %field, "Superseding open edit");
            self.rollback(table, previous);
        }

        let old_value = table
            .set_value(row_id, &field, value.clone())
            .map_err(|e| EditError::validation(&field, e.to_string()))?;

        let id = TxId(self.next_id);
        self.next_id += 1;
        debug!(%id, row = %row_id, field = %field, "Edit pending");
        self.by_cell.insert(cell, id);
        self.transactions.insert(
            id,
            EditTransaction {
                id,
                row_id: row_id.clone(),
                field,
                old_value,
                new_value: value,
                status: TxStatus::Pending,
                started_at: self.clock.now(),
            },
        );
        Ok(id)
    }

    /// Move a pending transaction to `committing` and hand out what to persist
    pub fn begin_commit(&mut self, id: TxId) -> Result<CommitTicket, EditError> {
        let tx = self
            .transactions
            .get_mut(&id)
            .ok_or(EditError::UnknownTransaction(id.0))?;
        if tx.status == TxStatus::Committing {
            return Err(EditError::AlreadyCommitting(id.0));
        }
        tx.status = TxStatus::Committing;
        debug!(%id, "Edit committing");
        Ok(CommitTicket {
            tx: id,
            row_id: tx.row_id.clone(),
            field: tx.field.clone(),
            value: tx.new_value.clone(),
        })
    }

    /// Apply the persister's answer. Late answers for superseded or cancelled
    /// transactions are ignored.
    pub fn resolve_commit(
        &mut self,
        table: &mut DataTable,
        ticket: &CommitTicket,
        result: Result<(), PersistenceError>,
    ) -> CommitOutcome {
        let live = self
            .transactions
            .get(&ticket.tx)
            .is_some_and(|tx| tx.status == TxStatus::Committing);
        if !live {
            debug!(tx = %ticket.tx, "Ignoring stale commit resolution");
            return CommitOutcome::Stale(ticket.tx);
        }

        match result {
            Ok(()) => match self.take(ticket.tx) {
                Some(tx) => {
                    info!(tx = %tx.id, row = %tx.row_id, field = %tx.field, "Edit committed");
                    CommitOutcome::Committed(tx)
                }
                None => CommitOutcome::Stale(ticket.tx),
            },
            Err(err) => match self.rollback(table, ticket.tx) {
                Some(tx) => {
                    warn!(tx = %tx.id, error = %err, "Edit rolled back after failed save");
                    CommitOutcome::RolledBack {
                        transaction: tx,
                        error: EditError::Persistence(err),
                    }
                }
                None => CommitOutcome::Stale(ticket.tx),
            },
        }
    }

    /// Explicit cancel: restores the old value
    pub fn cancel(&mut self, table: &mut DataTable, id: TxId) -> Result<EditTransaction, EditError> {
        self.rollback(table, id)
            .ok_or(EditError::UnknownTransaction(id.0))
    }

    /// Roll back every open transaction, newest first
    pub fn rollback_all(&mut self, table: &mut DataTable) -> usize {
        let ids: Vec<TxId> = self.transactions.keys().rev().copied().collect();
        let count = ids.len();
        for id in ids {
            self.rollback(table, id);
        }
        count
    }

    /// Start one transaction per edit. Failures are reported per edit and do
    /// not stop the rest of the batch.
    pub fn begin_bulk(
        &mut self,
        table: &mut DataTable,
        columns: &ColumnSet,
        edits: Vec<CellEdit>,
    ) -> BulkBegin {
        let mut outcome = BulkBegin::default();
        for edit in edits {
            match self.begin_edit(table, columns, &edit.row_id, &edit.field, edit.value.clone()) {
                Ok(id) => outcome.started.push(id),
                Err(err) => outcome.rejected.push((edit, err)),
            }
        }
        debug!(
            started = outcome.started.len(),
            rejected = outcome.rejected.len(),
            "Bulk edit started"
        );
        outcome
    }

    /// Tickets for every pending transaction, oldest first
    pub fn begin_commit_all(&mut self) -> Vec<CommitTicket> {
        let pending: Vec<TxId> = self
            .transactions
            .values()
            .filter(|tx| tx.status == TxStatus::Pending)
            .map(|tx| tx.id)
            .collect();
        pending
            .into_iter()
            .filter_map(|id| self.begin_commit(id).ok())
            .collect()
    }

    /// Forget transactions on deleted rows without touching the table
    pub fn drop_rows(&mut self, rows: &[RowId]) -> usize {
        let doomed: Vec<TxId> = self
            .transactions
            .values()
            .filter(|tx| rows.contains(&tx.row_id))
            .map(|tx| tx.id)
            .collect();
        for id in &doomed {
            self.take(*id);
        }
        if !doomed.is_empty() {
            debug!(dropped = doomed.len(), "Dropped edits on deleted rows");
        }
        doomed.len()
    }

    pub fn get(&self, id: TxId) -> Option<&EditTransaction> {
        self.transactions.get(&id)
    }

    pub fn pending_for(&self, row_id: &RowId, field: &str) -> Option<&EditTransaction> {
        let id = self.by_cell.get(&(row_id.clone(), field.to_string()))?;
        self.transactions.get(id)
    }

    pub fn is_editing(&self, row_id: &RowId) -> bool {
        self.transactions.values().any(|tx| &tx.row_id == row_id)
    }

    pub fn active_transactions(&self) -> impl Iterator<Item = &EditTransaction> {
        self.transactions.values()
    }

    pub fn is_idle(&self) -> bool {
        self.transactions.is_empty()
    }

    fn take(&mut self, id: TxId) -> Option<EditTransaction> {
        let tx = self.transactions.remove(&id)?;
        let cell = (tx.row_id.clone(), tx.field.clone());
        if self.by_cell.get(&cell) == Some(&id) {
            self.by_cell.remove(&cell);
        }
        Some(tx)
    }

    fn rollback(&mut self, table: &mut DataTable, id: TxId) -> Option<EditTransaction> {
        let tx = self.take(id)?;
        if let Err(err) = table.set_value(&tx.row_id, &tx.field, tx.old_value.clone()) {
            // Row deleted while the edit was open; nothing left to restore
            debug!(tx = %tx.id, error = %err, "Rollback target missing");
        }
        debug!(tx = %tx.id, row = %tx.row_id, field = %tx.field, "Edit rolled back");
        Some(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::datatable::DataRow;
    use crate::utils::clock::ManualClock;

    fn fixture() -> (DataTable, ColumnSet, EditManager) {
        let mut table = DataTable::keyed_by("people", "id");
        table
            .insert(
                DataRow::new()
                    .with("id", 1i64)
                    .with("status", "Active")
                    .with("score", 0i64)
                    .with("vip", false)
                    .with("note", ""),
            )
            .unwrap();
        table
            .insert(DataRow::new().with("id", 2i64).with("status", "Inactive"))
            .unwrap();
        let columns = ColumnSet::new(vec![
            ColumnDef::new("id", ColumnType::Number),
            ColumnDef::new("status", ColumnType::Select)
                .editable(true)
                .with_options(["Active", "Inactive"]),
            ColumnDef::new("score", ColumnType::Number).editable(true),
            ColumnDef::new("vip", ColumnType::Boolean).editable(true),
            ColumnDef::new("note", ColumnType::Text).editable(true),
        ]);
        (table, columns, EditManager::new(Rc::new(ManualClock::new())))
    }

    fn rejected() -> PersistenceError {
        PersistenceError::Unavailable("offline".into())
    }

    #[test]
    fn test_edit_applies_optimistically_and_commits() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);
        let tx = edits
            .begin_edit(&mut table, &columns, &id, "status", "Inactive".into())
            .unwrap();
        assert_eq!(table.get(&id).unwrap().get("status"), &DataValue::from("Inactive"));

        let ticket = edits.begin_commit(tx).unwrap();
        assert_eq!(edits.begin_commit(tx), Err(EditError::AlreadyCommitting(tx.0)));

        let outcome = edits.resolve_commit(&mut table, &ticket, Ok(()));
        assert!(matches!(outcome, CommitOutcome::Committed(_)));
        assert_eq!(table.get(&id).unwrap().get("status"), &DataValue::from("Inactive"));
        assert!(edits.is_idle());
    }

    #[test]
    fn test_failed_commit_restores_falsy_values() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);
        for (field, value, original) in [
            ("score", DataValue::Integer(7), DataValue::Integer(0)),
            ("vip", DataValue::Boolean(true), DataValue::Boolean(false)),
            ("note", DataValue::from("hello"), DataValue::from("")),
        ] {
            let tx = edits.begin_edit(&mut table, &columns, &id, field, value).unwrap();
            let ticket = edits.begin_commit(tx).unwrap();
            let outcome = edits.resolve_commit(&mut table, &ticket, Err(rejected()));
            assert!(matches!(outcome, CommitOutcome::RolledBack { .. }));
            assert_eq!(table.get(&id).unwrap().get(field), &original);
        }
    }

    #[test]
    fn test_second_edit_supersedes_and_late_result_is_stale() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);
        let first = edits
            .begin_edit(&mut table, &columns, &id, "score", DataValue::Integer(5))
            .unwrap();
        let first_ticket = edits.begin_commit(first).unwrap();

        let second = edits
            .begin_edit(&mut table, &columns, &id, "score", DataValue::Integer(9))
            .unwrap();
        assert_eq!(edits.pending_for(&id, "score").map(|t| t.id), Some(second));
        // Superseded edit restored the original before the new one captured it
        assert_eq!(edits.get(second).unwrap().old_value, DataValue::Integer(0));

        let late = edits.resolve_commit(&mut table, &first_ticket, Err(rejected()));
        assert_eq!(late, CommitOutcome::Stale(first));
        assert_eq!(table.get(&id).unwrap().get("score"), &DataValue::Integer(9));
    }

    #[test]
    fn test_validation_rejects_before_apply() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);

        let err = edits
            .begin_edit(&mut table, &columns, &id, "score", "lots".into())
            .unwrap_err();
        assert!(err.is_rollback());
        assert!(matches!(
            edits.begin_edit(&mut table, &columns, &id, "status", "Archived".into()),
            Err(EditError::Validation { .. })
        ));
        assert_eq!(
            edits.begin_edit(&mut table, &columns, &id, "id", DataValue::Integer(3)),
            Err(EditError::NotEditable("id".into()))
        );
        assert_eq!(
            edits.begin_edit(&mut table, &columns, &id, "nope", DataValue::Null),
            Err(EditError::UnknownColumn("nope".into()))
        );
        assert_eq!(
            edits.begin_edit(&mut table, &columns, &RowId::Number(99), "score", DataValue::Null),
            Err(EditError::UnknownRow(RowId::Number(99)))
        );
        assert_eq!(table.get(&id).unwrap().get("score"), &DataValue::Integer(0));
        assert!(edits.is_idle());
    }

    #[test]
    fn test_numeric_strings_are_normalized() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);
        edits
            .begin_edit(&mut table, &columns, &id, "score", " 42 ".into())
            .unwrap();
        assert_eq!(table.get(&id).unwrap().get("score"), &DataValue::Integer(42));
    }

    #[test]
    fn test_cancel_and_bulk() {
        let (mut table, columns, mut edits) = fixture();
        let tx = edits
            .begin_edit(&mut table, &columns, &RowId::Number(2), "status", "Active".into())
            .unwrap();
        let cancelled = edits.cancel(&mut table, tx).unwrap();
        assert_eq!(cancelled.old_value, DataValue::from("Inactive"));
        assert_eq!(
            table.get(&RowId::Number(2)).unwrap().get("status"),
            &DataValue::from("Inactive")
        );

        let begin = edits.begin_bulk(
            &mut table,
            &columns,
            vec![
                CellEdit::new(1i64, "status", "Inactive"),
                CellEdit::new(2i64, "status", "Bogus"),
                CellEdit::new(2i64, "score", 3i64),
            ],
        );
        assert_eq!(begin.started.len(), 2);
        assert_eq!(begin.rejected.len(), 1);

        let tickets = edits.begin_commit_all();
        let mut report = BulkReport::default();
        for (i, ticket) in tickets.iter().enumerate() {
            let result = if i == 0 { Ok(()) } else { Err(rejected()) };
            report.record(&edits.resolve_commit(&mut table, ticket, result));
        }
        assert_eq!(report.committed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete_success());
    }

    #[test]
    fn test_deleted_row_drops_its_transactions() {
        let (mut table, columns, mut edits) = fixture();
        let id = RowId::Number(1);
        let tx = edits
            .begin_edit(&mut table, &columns, &id, "score", DataValue::Integer(1))
            .unwrap();
        let ticket = edits.begin_commit(tx).unwrap();
        table.remove(&[id.clone()]);
        assert_eq!(edits.drop_rows(&[id]), 1);
        assert_eq!(edits.resolve_commit(&mut table, &ticket, Ok(())), CommitOutcome::Stale(tx));
    }
}
