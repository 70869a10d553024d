use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::DatasetError;

/// Represents the data type inferred for a raw value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Null,
    Mixed, // For columns with mixed types
}

impl DataType {
    /// Infer type from a string value
    pub fn infer_from_string(value: &str) -> Self {
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            return DataType::Null;
        }

        if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            return DataType::Boolean;
        }

        if value.parse::<i64>().is_ok() {
            return DataType::Integer;
        }

        if value.parse::<f64>().is_ok() {
            return DataType::Float;
        }

        if parse_instant(value).is_some() {
            return DataType::DateTime;
        }

        DataType::String
    }

    /// Merge two types (for columns with mixed types)
    pub fn merge(&self, other: &DataType) -> DataType {
        if self == other {
            return self.clone();
        }

        match (self, other) {
            (DataType::Null, t) | (t, DataType::Null) => t.clone(),
            (DataType::Integer, DataType::Float) | (DataType::Float, DataType::Integer) => {
                DataType::Float
            }
            _ => DataType::Mixed,
        }
    }
}

/// Parse the date formats the loaders and editors accept into an instant
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.len() < 8 {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// A single cell value in the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(String), // ISO 8601 text, parsed on demand
    Null,
}

static NULL_VALUE: DataValue = DataValue::Null;

impl DataValue {
    pub fn from_string(s: &str, data_type: &DataType) -> Self {
        if s.is_empty() || s.eq_ignore_ascii_case("null") {
            return DataValue::Null;
        }

        match data_type {
            DataType::String => DataValue::String(s.to_string()),
            DataType::Integer => s
                .parse::<i64>()
                .map(DataValue::Integer)
                .unwrap_or_else(|_| DataValue::String(s.to_string())),
            DataType::Float => s
                .parse::<f64>()
                .map(DataValue::Float)
                .unwrap_or_else(|_| DataValue::String(s.to_string())),
            DataType::Boolean => {
                let lower = s.to_lowercase();
                DataValue::Boolean(lower == "true" || lower == "1" || lower == "yes")
            }
            DataType::DateTime => DataValue::DateTime(s.to_string()),
            DataType::Null => DataValue::Null,
            DataType::Mixed => {
                let inferred = DataType::infer_from_string(s);
                Self::from_string(s, &inferred)
            }
        }
    }

    /// Convert a JSON scalar into a value. Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => DataValue::Null,
            JsonValue::Bool(b) => DataValue::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => DataValue::Integer(i),
                None => DataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => {
                if parse_instant(s).is_some() && s.contains('-') {
                    DataValue::DateTime(s.clone())
                } else {
                    DataValue::String(s.clone())
                }
            }
            other => DataValue::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            DataValue::String(s) | DataValue::DateTime(s) => JsonValue::String(s.clone()),
            DataValue::Integer(i) => JsonValue::from(*i),
            DataValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DataValue::Boolean(b) => JsonValue::Bool(*b),
            DataValue::Null => JsonValue::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Null or blank text. Filters treat these as "no constraint".
    pub fn is_empty(&self) -> bool {
        match self {
            DataValue::Null => true,
            DataValue::String(s) | DataValue::DateTime(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric coercion. Null, blank text and non-numeric text fail.
    pub fn as_f64(&self) -> Option<f64> {
        let n = match self {
            DataValue::Integer(i) => *i as f64,
            DataValue::Float(f) => *f,
            DataValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            DataValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok()?
            }
            DataValue::DateTime(_) | DataValue::Null => return None,
        };
        if n.is_nan() {
            None
        } else {
            Some(n)
        }
    }

    /// Instant for date-typed comparisons
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            DataValue::DateTime(s) | DataValue::String(s) => parse_instant(s),
            DataValue::Integer(ms) => DateTime::from_timestamp_millis(*ms),
            _ => None,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::String(_) => DataType::String,
            DataValue::Integer(_) => DataType::Integer,
            DataValue::Float(_) => DataType::Float,
            DataValue::Boolean(_) => DataType::Boolean,
            DataValue::DateTime(_) => DataType::DateTime,
            DataValue::Null => DataType::Null,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::String(s) => write!(f, "{}", s),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::DateTime(dt) => write!(f, "{}", dt),
            DataValue::Null => write!(f, ""),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<i64> for DataValue {
    fn from(i: i64) -> Self {
        DataValue::Integer(i)
    }
}

impl From<f64> for DataValue {
    fn from(f: f64) -> Self {
        DataValue::Float(f)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Boolean(b)
    }
}

/// Stable identity of a row, derived by the table's id extractor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Number(i64),
    Text(String),
}

impl RowId {
    /// Identity from a key column value. Floats only qualify when integral.
    pub fn from_value(value: &DataValue) -> Option<Self> {
        match value {
            DataValue::Integer(i) => Some(RowId::Number(*i)),
            DataValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                Some(RowId::Number(*f as i64))
            }
            DataValue::String(s) | DataValue::DateTime(s) if !s.is_empty() => {
                Some(RowId::Text(s.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Number(n) => write!(f, "{}", n),
            RowId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        RowId::Number(n)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId::Text(s.to_string())
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        RowId::Text(s)
    }
}

/// A row of data: field name to value. Absent fields read as `Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub values: BTreeMap<String, DataValue>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, DataValue)>,
        K: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, field: &str) -> &DataValue {
        self.values.get(field).unwrap_or(&NULL_VALUE)
    }

    pub fn set(&mut self, field: impl Into<String>, value: DataValue) -> DataValue {
        self.values
            .insert(field.into(), value)
            .unwrap_or(DataValue::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extracts the identity of a row
pub type RowIdFn = Arc<dyn Fn(&DataRow) -> Option<RowId> + Send + Sync>;

/// Canonical store of rows keyed by a caller-supplied identity function.
///
/// Rows keep insertion order; that order is the "input order" the query
/// pipeline falls back to when no sort is active.
#[derive(Clone)]
pub struct DataTable {
    pub name: String,
    rows: Vec<DataRow>,
    ids: Vec<RowId>,
    index: HashMap<RowId, usize>,
    id_fn: RowIdFn,
    pub metadata: HashMap<String, String>,
}

impl fmt::Debug for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTable")
            .field("name", &self.name)
            .field("rows", &self.rows.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl DataTable {
    pub fn new(name: impl Into<String>, id_fn: RowIdFn) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
            ids: Vec::new(),
            index: HashMap::new(),
            id_fn,
            metadata: HashMap::new(),
        }
    }

    /// Table whose identity is the value of a single key field
    pub fn keyed_by(name: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            name,
            Arc::new(move |row: &DataRow| RowId::from_value(row.get(&field))),
        )
    }

    pub fn row_id_of(&self, row: &DataRow) -> Option<RowId> {
        (self.id_fn)(row)
    }

    pub fn insert(&mut self, row: DataRow) -> Result<RowId, DatasetError> {
        let id = self.row_id_of(&row).ok_or(DatasetError::MissingRowId)?;
        if self.index.contains_key(&id) {
            return Err(DatasetError::DuplicateRowId(id));
        }
        self.index.insert(id.clone(), self.rows.len());
        self.ids.push(id.clone());
        self.rows.push(row);
        Ok(id)
    }

    pub fn extend<I>(&mut self, rows: I) -> Result<usize, DatasetError>
    where
        I: IntoIterator<Item = DataRow>,
    {
        let mut added = 0;
        for row in rows {
            self.insert(row)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn get(&self, id: &RowId) -> Option<&DataRow> {
        self.index.get(id).map(|&idx| &self.rows[idx])
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.index.contains_key(id)
    }

    pub fn position(&self, id: &RowId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn row_at(&self, index: usize) -> Option<&DataRow> {
        self.rows.get(index)
    }

    pub fn id_at(&self, index: usize) -> Option<&RowId> {
        self.ids.get(index)
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &DataRow)> {
        self.ids.iter().zip(self.rows.iter())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Overwrite one field, returning the previous value.
    ///
    /// Only the edit manager and snapshot restore mutate rows. An edit that
    /// would change the row's identity is reverted and rejected.
    pub(crate) fn set_value(
        &mut self,
        id: &RowId,
        field: &str,
        value: DataValue,
    ) -> Result<DataValue, DatasetError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| DatasetError::RowNotFound(id.clone()))?;
        let old = self.rows[idx].set(field, value);
        if (self.id_fn)(&self.rows[idx]).as_ref() != Some(id) {
            self.rows[idx].set(field, old);
            return Err(DatasetError::IdentityChange(id.clone()));
        }
        Ok(old)
    }

    /// Remove rows by id, returning `(original_position, row)` for each removed row
    pub fn remove(&mut self, ids: &[RowId]) -> Vec<(usize, DataRow)> {
        let doomed: HashSet<usize> = ids.iter().filter_map(|id| self.position(id)).collect();
        if doomed.is_empty() {
            return Vec::new();
        }

        let keep = self.rows.len() - doomed.len();
        let mut kept_ids = Vec::with_capacity(keep);
        let mut kept_rows = Vec::with_capacity(keep);
        let mut removed = Vec::with_capacity(doomed.len());
        let old_ids = std::mem::take(&mut self.ids);
        let old_rows = std::mem::take(&mut self.rows);
        for (idx, (id, row)) in old_ids.into_iter().zip(old_rows).enumerate() {
            if doomed.contains(&idx) {
                removed.push((idx, row));
            } else {
                kept_ids.push(id);
                kept_rows.push(row);
            }
        }
        self.ids = kept_ids;
        self.rows = kept_rows;
        self.reindex();
        debug!(table = %self.name, removed = removed.len(), "Removed rows");
        removed
    }

    /// Replace all rows (snapshot restore). Fails without modifying the table
    /// when the rows violate id uniqueness.
    pub fn replace_rows(&mut self, rows: Vec<DataRow>) -> Result<(), DatasetError> {
        let (ids, index) = self.index_rows(&rows)?;
        self.rows = rows;
        self.ids = ids;
        self.index = index;
        Ok(())
    }

    /// Whether `replace_rows` would accept these rows
    pub fn check_rows(&self, rows: &[DataRow]) -> Result<(), DatasetError> {
        self.index_rows(rows).map(|_| ())
    }

    fn index_rows(
        &self,
        rows: &[DataRow],
    ) -> Result<(Vec<RowId>, HashMap<RowId, usize>), DatasetError> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let id = self.row_id_of(row).ok_or(DatasetError::MissingRowId)?;
            if index.insert(id.clone(), idx).is_some() {
                return Err(DatasetError::DuplicateRowId(id));
            }
            ids.push(id);
        }
        Ok((ids, index))
    }

    fn reindex(&mut self) {
        self.index = self
            .ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: i64, name: &str) -> DataRow {
        DataRow::new().with("id", id).with("name", name)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = DataTable::keyed_by("people", "id");
        table.insert(person(1, "Alice")).unwrap();
        table.insert(person(2, "Bob")).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.position(&RowId::Number(2)), Some(1));
        assert_eq!(
            table.get(&RowId::Number(1)).unwrap().get("name"),
            &DataValue::from("Alice")
        );
        assert!(table.get(&RowId::Number(3)).is_none());
    }

    #[test]
    fn test_duplicate_and_missing_ids_rejected() {
        let mut table = DataTable::keyed_by("people", "id");
        table.insert(person(1, "Alice")).unwrap();

        assert_eq!(
            table.insert(person(1, "Again")),
            Err(DatasetError::DuplicateRowId(RowId::Number(1)))
        );
        assert_eq!(
            table.insert(DataRow::new().with("name", "Nobody")),
            Err(DatasetError::MissingRowId)
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_reindexes() {
        let mut table = DataTable::keyed_by("people", "id");
        for i in 1..=5 {
            table.insert(person(i, &format!("P{}", i))).unwrap();
        }

        let removed = table.remove(&[
            RowId::Number(4),
            RowId::Number(2),
            RowId::Number(99),
            RowId::Number(4),
        ]);
        assert_eq!(
            removed.iter().map(|(idx, _)| *idx).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(
            table.ids(),
            &[RowId::Number(1), RowId::Number(3), RowId::Number(5)]
        );
        assert_eq!(table.position(&RowId::Number(5)), Some(2));
        assert_eq!(table.rows()[1].get("name"), &DataValue::from("P3"));
    }

    #[test]
    fn test_set_value_refuses_identity_change() {
        let mut table = DataTable::keyed_by("people", "id");
        table.insert(person(1, "Alice")).unwrap();

        let err = table
            .set_value(&RowId::Number(1), "id", DataValue::Integer(7))
            .unwrap_err();
        assert_eq!(err, DatasetError::IdentityChange(RowId::Number(1)));
        assert_eq!(
            table.get(&RowId::Number(1)).unwrap().get("id"),
            &DataValue::Integer(1)
        );
    }

    #[test]
    fn test_absent_field_reads_null() {
        let row = person(1, "Alice");
        assert!(row.get("salary").is_null());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(DataValue::from(" 42 ").as_f64(), Some(42.0));
        assert_eq!(DataValue::from("abc").as_f64(), None);
        assert_eq!(DataValue::from("").as_f64(), None);
        assert_eq!(DataValue::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(DataValue::Null.as_f64(), None);
    }

    #[test]
    fn test_infer_from_string() {
        assert_eq!(DataType::infer_from_string("12"), DataType::Integer);
        assert_eq!(DataType::infer_from_string("1.5"), DataType::Float);
        assert_eq!(DataType::infer_from_string("2024-03-01"), DataType::DateTime);
        assert_eq!(DataType::infer_from_string("hello"), DataType::String);
        assert_eq!(
            DataType::Integer.merge(&DataType::Float),
            DataType::Float
        );
    }

    #[test]
    fn test_row_id_serializes_untagged() {
        let ids = vec![RowId::Number(3), RowId::Text("a".into())];
        let json = serde_json::to_string(&ids).unwrap();
        assert_eq!(json, r#"[3,"a"]"#);
        let back: Vec<RowId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ids);
    }
}
