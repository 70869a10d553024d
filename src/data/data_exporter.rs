use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::data::column::ColumnDef;
use crate::data::datatable::{DataRow, RowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    /// Tab-separated text that spreadsheet apps paste and open directly
    Excel,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            "excel" | "xls" | "tsv" => Some(ExportFormat::Excel),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Excel => "tsv",
        }
    }
}

/// The authoritative rows to export, already searched, filtered, sorted and
/// scoped, with the columns to include in display order
#[derive(Debug, Clone)]
pub struct ExportBatch<'a> {
    pub columns: Vec<&'a ColumnDef>,
    pub rows: Vec<(&'a RowId, &'a DataRow)>,
}

impl ExportBatch<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Renders an export batch into a document
pub trait RowExporter {
    fn export_rows(&self, batch: &ExportBatch<'_>, format: ExportFormat) -> Result<String>;
}

/// Handles exporting rows to CSV, JSON and tab-separated text
#[derive(Debug, Clone, Copy, Default)]
pub struct DataExporter;

impl RowExporter for DataExporter {
    fn export_rows(&self, batch: &ExportBatch<'_>, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Csv => Self::generate_csv_text(batch),
            ExportFormat::Json => Self::generate_json_text(batch),
            ExportFormat::Excel => Ok(Self::generate_tsv_text(batch)),
        }
    }
}

impl DataExporter {
    /// CSV with field names as headers and raw values
    pub fn generate_csv_text(batch: &ExportBatch<'_>) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(batch.columns.iter().map(|c| c.field.as_str()))?;
        for (_, row) in &batch.rows {
            writer.write_record(batch.columns.iter().map(|c| c.value(row).to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush CSV writer: {}", e))?;
        String::from_utf8(bytes).context("CSV output is not valid UTF-8")
    }

    /// JSON array of objects keyed by field, values keeping their types
    pub fn generate_json_text(batch: &ExportBatch<'_>) -> Result<String> {
        let array: Vec<Value> = batch
            .rows
            .iter()
            .map(|(_, row)| {
                let mut object = serde_json::Map::new();
                for column in &batch.columns {
                    object.insert(column.field.clone(), column.value(row).to_json());
                }
                Value::Object(object)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&array)?)
    }

    /// Tab-separated text with titles as headers and formatted values
    pub fn generate_tsv_text(batch: &ExportBatch<'_>) -> String {
        let clean = |s: &str| s.replace(['\t', '\n', '\r'], " ");
        let mut out = batch
            .columns
            .iter()
            .map(|c| clean(&c.title))
            .collect::<Vec<_>>()
            .join("\t");
        out.push('\n');
        for (_, row) in &batch.rows {
            let line = batch
                .columns
                .iter()
                .map(|c| clean(&c.format(c.value(row))))
                .collect::<Vec<_>>()
                .join("\t");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Write an export into `dir` under a timestamped name
    pub fn write_to_dir(contents: &str, format: ExportFormat, dir: &Path) -> Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("grid_export_{}.{}", timestamp, format.extension());
        let path = dir.join(filename);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write export {}", path.display()))?;
        info!(path = %path.display(), ?format, "Exported rows");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::ColumnType;

    fn batch_fixture() -> (Vec<ColumnDef>, Vec<(RowId, DataRow)>) {
        let columns = vec![
            ColumnDef::new("name", ColumnType::Text).with_title("Name"),
            ColumnDef::new("salary", ColumnType::Number).with_title("Salary"),
            ColumnDef::new("active", ColumnType::Boolean).with_title("Active"),
        ];
        let rows = vec![
            (
                RowId::Number(1),
                DataRow::new()
                    .with("name", "Smith, Jo")
                    .with("salary", 1200.5)
                    .with("active", true),
            ),
            (
                RowId::Number(2),
                DataRow::new().with("name", "Lee").with("salary", 900i64),
            ),
        ];
        (columns, rows)
    }

    fn batch<'a>(columns: &'a [ColumnDef], rows: &'a [(RowId, DataRow)]) -> ExportBatch<'a> {
        ExportBatch {
            columns: columns.iter().collect(),
            rows: rows.iter().map(|(id, row)| (id, row)).collect(),
        }
    }

    #[test]
    fn test_csv_quotes_fields() {
        let (columns, rows) = batch_fixture();
        let text = DataExporter
            .export_rows(&batch(&columns, &rows), ExportFormat::Csv)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "name,salary,active");
        assert_eq!(lines[1], "\"Smith, Jo\",1200.5,true");
        assert_eq!(lines[2], "Lee,900,");
    }

    #[test]
    fn test_json_keeps_types() {
        let (columns, rows) = batch_fixture();
        let text = DataExporter
            .export_rows(&batch(&columns, &rows), ExportFormat::Json)
            .unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["salary"], serde_json::json!(1200.5));
        assert_eq!(parsed[1]["active"], Value::Null);
    }

    #[test]
    fn test_excel_is_tab_separated_with_titles() {
        let (columns, rows) = batch_fixture();
        let text = DataExporter
            .export_rows(&batch(&columns, &rows), ExportFormat::Excel)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Name\tSalary\tActive");
        assert_eq!(lines[1], "Smith, Jo\t1200.50\tYes");
        assert_eq!(ExportFormat::parse("XLS"), Some(ExportFormat::Excel));
    }
}
