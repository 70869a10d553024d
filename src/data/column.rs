//! Column descriptors
//!
//! Columns are configuration: built once per view and replaced wholesale
//! when the view is reconfigured.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::data::datatable::{DataRow, DataType, DataValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Select,
}

impl From<&DataType> for ColumnType {
    fn from(data_type: &DataType) -> Self {
        match data_type {
            DataType::Integer | DataType::Float => ColumnType::Number,
            DataType::Boolean => ColumnType::Boolean,
            DataType::DateTime => ColumnType::Date,
            _ => ColumnType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinSide {
    Left,
    Right,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    #[default]
    None,
}

/// Custom display formatter for a column
pub type Formatter = Arc<dyn Fn(&DataValue) -> String + Send + Sync>;

#[derive(Clone)]
pub struct ColumnDef {
    pub id: String,
    pub field: String,
    pub title: String,
    pub column_type: ColumnType,
    pub sortable: bool,
    pub filterable: bool,
    pub editable: bool,
    pub visible: bool,
    pub pinned: PinSide,
    pub aggregation: Aggregation,
    /// Allowed values for `Select` columns; empty means unrestricted
    pub options: Vec<String>,
    formatter: Option<Formatter>,
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("id", &self.id)
            .field("field", &self.field)
            .field("column_type", &self.column_type)
            .field("sortable", &self.sortable)
            .field("filterable", &self.filterable)
            .field("editable", &self.editable)
            .field("pinned", &self.pinned)
            .field("aggregation", &self.aggregation)
            .finish()
    }
}

impl ColumnDef {
    /// Column whose id, field and title are all `field`
    pub fn new(field: impl Into<String>, column_type: ColumnType) -> Self {
        let field = field.into();
        Self {
            id: field.clone(),
            title: field.clone(),
            field,
            column_type,
            sortable: true,
            filterable: true,
            editable: false,
            visible: true,
            pinned: PinSide::None,
            aggregation: Aggregation::None,
            options: Vec::new(),
            formatter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn pinned(mut self, side: PinSide) -> Self {
        self.pinned = side;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_format<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&DataValue) -> String + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    pub fn value<'a>(&self, row: &'a DataRow) -> &'a DataValue {
        row.get(&self.field)
    }

    /// Display text for a value, using the custom formatter when present
    pub fn format(&self, value: &DataValue) -> String {
        if let Some(formatter) = &self.formatter {
            return formatter(value);
        }
        match (self.column_type, value) {
            (_, DataValue::Null) => String::new(),
            (ColumnType::Number, DataValue::Float(f)) if f.fract() == 0.0 => format!("{:.0}", f),
            (ColumnType::Number, DataValue::Float(f)) => format!("{:.2}", f),
            (ColumnType::Boolean, DataValue::Boolean(true)) => "Yes".to_string(),
            (ColumnType::Boolean, DataValue::Boolean(false)) => "No".to_string(),
            _ => value.to_string(),
        }
    }
}

/// The column configuration of one view
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    columns: Vec<ColumnDef>,
}

impl ColumnSet {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn get(&self, id: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn by_field(&self, field: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    pub fn visible(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.visible)
    }

    /// Visible columns in display order: left-pinned, unpinned, right-pinned
    pub fn display_order(&self) -> Vec<&ColumnDef> {
        let side = |side: PinSide| self.visible().filter(move |c| c.pinned == side);
        side(PinSide::Left)
            .chain(side(PinSide::None))
            .chain(side(PinSide::Right))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_order_respects_pinning() {
        let columns = ColumnSet::new(vec![
            ColumnDef::new("name", ColumnType::Text),
            ColumnDef::new("actions", ColumnType::Text).pinned(PinSide::Right),
            ColumnDef::new("id", ColumnType::Number).pinned(PinSide::Left),
            ColumnDef::new("secret", ColumnType::Text).hidden(),
        ]);

        let order: Vec<&str> = columns
            .display_order()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(order, vec!["id", "name", "actions"]);
    }

    #[test]
    fn test_default_and_custom_format() {
        let salary = ColumnDef::new("salary", ColumnType::Number);
        assert_eq!(salary.format(&DataValue::Float(1200.0)), "1200");
        assert_eq!(salary.format(&DataValue::Float(12.5)), "12.50");
        assert_eq!(salary.format(&DataValue::Null), "");

        let money = salary.with_format(|v| format!("${}", v));
        assert_eq!(money.format(&DataValue::Integer(5)), "$5");
    }
}
