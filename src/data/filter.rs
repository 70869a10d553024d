//! Column filter criteria
//!
//! At most one criterion per column; all active criteria combine with AND.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::data::column::{ColumnDef, ColumnType};
use crate::data::datatable::{DataRow, DataValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl FilterOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "equals" | "eq" | "=" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "startswith" => Some(Self::StartsWith),
            "endswith" => Some(Self::EndsWith),
            "gt" | ">" => Some(Self::Gt),
            "lt" | "<" => Some(Self::Lt),
            "gte" | ">=" => Some(Self::Gte),
            "lte" | "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }
}

/// User supplied row predicate. An `Err` excludes the row and is reported.
pub type CustomPredicate = Arc<dyn Fn(&DataRow) -> Result<bool, String> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct FilterCriterion {
    pub column: String,
    pub operator: FilterOperator,
    pub value: DataValue,
    #[serde(skip)]
    predicate: Option<CustomPredicate>,
}

impl fmt::Debug for FilterCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCriterion")
            .field("column", &self.column)
            .field("operator", &self.operator)
            .field("value", &self.value)
            .field("custom", &self.predicate.is_some())
            .finish()
    }
}

impl FilterCriterion {
    pub fn new(
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<DataValue>,
    ) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
            predicate: None,
        }
    }

    /// A criterion evaluated by a caller-supplied predicate instead of an operator
    pub fn custom<F>(column: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&DataRow) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            column: column.into(),
            operator: FilterOperator::Equals,
            value: DataValue::Null,
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.predicate.is_some()
    }

    /// Evaluate against one row. Empty criterion values never block a row.
    pub fn evaluate(&self, row: &DataRow, column: &ColumnDef) -> Result<bool, String> {
        if let Some(predicate) = &self.predicate {
            return predicate(row);
        }
        if self.value.is_empty() {
            return Ok(true);
        }

        let cell = column.value(row);
        let result = match self.operator {
            FilterOperator::Contains => text_of(cell).contains(&text_of(&self.value)),
            FilterOperator::StartsWith => text_of(cell).starts_with(&text_of(&self.value)),
            FilterOperator::EndsWith => text_of(cell).ends_with(&text_of(&self.value)),
            FilterOperator::Equals => equals(cell, &self.value, column.column_type),
            op => match compare_ordered(cell, &self.value, column.column_type) {
                Some(ordering) => match op {
                    FilterOperator::Gt => ordering.is_gt(),
                    FilterOperator::Lt => ordering.is_lt(),
                    FilterOperator::Gte => ordering.is_ge(),
                    _ => ordering.is_le(),
                },
                None => false,
            },
        };
        Ok(result)
    }
}

fn text_of(value: &DataValue) -> String {
    value.to_string().to_lowercase()
}

fn equals(cell: &DataValue, target: &DataValue, column_type: ColumnType) -> bool {
    if let (Some(a), Some(b)) = (cell.as_f64(), target.as_f64()) {
        return a == b;
    }
    if column_type == ColumnType::Date {
        if let (Some(a), Some(b)) = (cell.as_instant(), target.as_instant()) {
            return a == b;
        }
    }
    text_of(cell) == text_of(target)
}

/// Ordering comparison after coercion. `None` when either side fails to coerce.
fn compare_ordered(
    cell: &DataValue,
    target: &DataValue,
    column_type: ColumnType,
) -> Option<std::cmp::Ordering> {
    if column_type == ColumnType::Date {
        return Some(cell.as_instant()?.cmp(&target.as_instant()?));
    }
    if let (Some(a), Some(b)) = (cell.as_f64(), target.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (cell, target) {
        (DataValue::DateTime(_), _) => Some(cell.as_instant()?.cmp(&target.as_instant()?)),
        _ => None,
    }
}

/// Active filters keyed by column id
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    criteria: BTreeMap<String, FilterCriterion>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the criterion for a column. An empty value removes it.
    /// Returns true when the active set changed.
    pub fn set(&mut self, criterion: FilterCriterion) -> bool {
        if !criterion.is_custom() && criterion.value.is_empty() {
            return self.remove(&criterion.column);
        }
        debug!(column = %criterion.column, operator = ?criterion.operator, "Setting filter");
        self.criteria.insert(criterion.column.clone(), criterion);
        true
    }

    pub fn remove(&mut self, column: &str) -> bool {
        self.criteria.remove(column).is_some()
    }

    pub fn clear(&mut self) {
        self.criteria.clear();
    }

    pub fn get(&self, column: &str) -> Option<&FilterCriterion> {
        self.criteria.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterCriterion> {
        self.criteria.values()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Criteria that can be written to a session blob (custom predicates cannot)
    pub fn persistable(&self) -> Vec<FilterCriterion> {
        self.iter().filter(|c| !c.is_custom()).cloned().collect()
    }
}

impl FromIterator<FilterCriterion> for FilterSet {
    fn from_iter<T: IntoIterator<Item = FilterCriterion>>(iter: T) -> Self {
        let mut set = FilterSet::new();
        for criterion in iter {
            set.set(criterion);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> DataRow {
        DataRow::new()
            .with("name", "Alice Smith")
            .with("salary", 95000i64)
            .with("age", "41")
            .with("active", false)
            .with("joined", DataValue::DateTime("2021-06-01".into()))
    }

    fn col(field: &str, column_type: ColumnType) -> ColumnDef {
        ColumnDef::new(field, column_type)
    }

    #[test]
    fn test_string_operators_are_case_insensitive() {
        let name = col("name", ColumnType::Text);
        let check = |op, v: &str| {
            FilterCriterion::new("name", op, v)
                .evaluate(&row(), &name)
                .unwrap()
        };
        assert!(check(FilterOperator::Contains, "SMITH"));
        assert!(check(FilterOperator::StartsWith, "alice"));
        assert!(check(FilterOperator::EndsWith, "ith"));
        assert!(check(FilterOperator::Equals, "alice smith"));
        assert!(!check(FilterOperator::StartsWith, "smith"));
    }

    #[test]
    fn test_numeric_operators_coerce_both_sides() {
        let age = col("age", ColumnType::Number);
        let gt = FilterCriterion::new("age", FilterOperator::Gt, 40i64);
        assert!(gt.evaluate(&row(), &age).unwrap());

        let lte = FilterCriterion::new("age", FilterOperator::Lte, "41");
        assert!(lte.evaluate(&row(), &age).unwrap());
    }

    #[test]
    fn test_numeric_coercion_failure_is_false() {
        let name = col("name", ColumnType::Text);
        let gt = FilterCriterion::new("name", FilterOperator::Gt, 10i64);
        assert_eq!(gt.evaluate(&row(), &name), Ok(false));
    }

    #[test]
    fn test_date_ordering() {
        let joined = col("joined", ColumnType::Date);
        let after = FilterCriterion::new("joined", FilterOperator::Gte, "2021-01-01");
        assert!(after.evaluate(&row(), &joined).unwrap());
        let before = FilterCriterion::new("joined", FilterOperator::Lt, "2020-01-01");
        assert!(!before.evaluate(&row(), &joined).unwrap());
    }

    #[test]
    fn test_empty_value_never_blocks() {
        let name = col("name", ColumnType::Text);
        let empty = FilterCriterion::new("name", FilterOperator::Equals, "");
        assert!(empty.evaluate(&row(), &name).unwrap());
    }

    #[test]
    fn test_set_with_empty_value_removes() {
        let mut filters = FilterSet::new();
        filters.set(FilterCriterion::new("name", FilterOperator::Contains, "al"));
        filters.set(FilterCriterion::new("name", FilterOperator::Contains, "bo"));
        assert_eq!(filters.len(), 1);
        assert_eq!(filters.get("name").unwrap().value, DataValue::from("bo"));

        assert!(filters.set(FilterCriterion::new("name", FilterOperator::Contains, DataValue::Null)));
        assert!(filters.is_empty());
    }

    #[test]
    fn test_custom_predicate_error_surfaces() {
        let name = col("name", ColumnType::Text);
        let broken = FilterCriterion::custom("name", |_row| Err("boom".to_string()));
        assert_eq!(broken.evaluate(&row(), &name), Err("boom".to_string()));
    }

    #[test]
    fn test_operator_serializes_camel_case() {
        let json = serde_json::to_string(&FilterOperator::StartsWith).unwrap();
        assert_eq!(json, "\"startsWith\"");
    }
}
