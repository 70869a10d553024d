use anyhow::{anyhow, bail, Context, Result};
use csv::ReaderBuilder;
use serde_json::Value as JsonValue;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

use crate::data::column::{ColumnDef, ColumnSet, ColumnType};
use crate::data::datatable::{DataRow, DataTable, DataType, DataValue};

/// Rows plus a column configuration inferred from them
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub table: DataTable,
    pub columns: ColumnSet,
}

/// Number of rows sampled for type inference
const SAMPLE_SIZE: usize = 100;

/// One column per field, typed from the sample. Every column but the key is editable.
fn build_columns(names: &[String], types: &[DataType], id_field: &str) -> ColumnSet {
    ColumnSet::new(
        names
            .iter()
            .zip(types)
            .map(|(name, data_type)| {
                ColumnDef::new(name.clone(), ColumnType::from(data_type)).editable(name != id_field)
            })
            .collect(),
    )
}

fn resolve_id_field(names: &[String], id_field: Option<&str>) -> Result<String> {
    match id_field {
        Some(field) if names.iter().any(|n| n == field) => Ok(field.to_string()),
        Some(field) => bail!("Id field '{}' not found in columns {:?}", field, names),
        None => names
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("Cannot pick an id field: the data has no columns")),
    }
}

/// Load a CSV file into a DataTable keyed by `id_field` (default: first column)
pub fn load_csv_to_datatable<P: AsRef<Path>>(
    path: P,
    table_name: &str,
    id_field: Option<&str>,
) -> Result<LoadedData> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path.as_ref()))?;
    let mut loaded = load_csv_from_reader(file, table_name, id_field)?;

    // Add metadata about the source
    loaded
        .table
        .metadata
        .insert("source_path".to_string(), path.as_ref().display().to_string());
    Ok(loaded)
}

pub fn load_csv_from_reader<R: Read>(
    reader: R,
    table_name: &str,
    id_field: Option<&str>,
) -> Result<LoadedData> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let names: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let id_field = resolve_id_field(&names, id_field)?;

    // Read all rows first to collect data
    let mut string_rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        string_rows.push(record.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    // Infer column types by sampling the data
    let mut column_types = vec![DataType::Null; names.len()];
    for row in string_rows.iter().take(SAMPLE_SIZE) {
        for (col_idx, value) in row.iter().enumerate().take(names.len()) {
            if !value.is_empty() {
                let inferred = DataType::infer_from_string(value);
                column_types[col_idx] = column_types[col_idx].merge(&inferred);
            }
        }
    }

    let mut table = DataTable::keyed_by(table_name, id_field.clone());
    table
        .metadata
        .insert("source_type".to_string(), "csv".to_string());

    // Convert string data to typed DataValues and add rows
    for (line, string_row) in string_rows.iter().enumerate() {
        let row = DataRow::from_pairs(
            names
                .iter()
                .zip(&column_types)
                .zip(string_row)
                .map(|((name, data_type), value)| {
                    (name.clone(), DataValue::from_string(value, data_type))
                }),
        );
        table
            .insert(row)
            .with_context(|| format!("CSV record {} rejected", line + 1))?;
    }

    info!(table = table_name, rows = table.len(), "Loaded CSV");
    let columns = build_columns(&names, &column_types, &id_field);
    Ok(LoadedData { table, columns })
}

/// Load a JSON file (an array of objects) into a DataTable
pub fn load_json_to_datatable<P: AsRef<Path>>(
    path: P,
    table_name: &str,
    id_field: Option<&str>,
) -> Result<LoadedData> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open JSON file: {:?}", path.as_ref()))?;
    let reader = BufReader::new(file);

    // Parse JSON - expect an array of objects
    let json_data: Vec<JsonValue> =
        serde_json::from_reader(reader).with_context(|| "Failed to parse JSON file")?;

    let mut loaded = load_json_data_to_datatable(json_data, table_name, id_field)?;
    loaded
        .table
        .metadata
        .insert("source_path".to_string(), path.as_ref().display().to_string());
    Ok(loaded)
}

/// Load JSON data directly (already parsed) into a DataTable
pub fn load_json_data_to_datatable(
    data: Vec<JsonValue>,
    table_name: &str,
    id_field: Option<&str>,
) -> Result<LoadedData> {
    // Union of keys across objects, in first-seen order
    let mut names: Vec<String> = Vec::new();
    for item in &data {
        let obj = item
            .as_object()
            .context("JSON data must be an array of objects")?;
        for key in obj.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    let id_field = resolve_id_field(&names, id_field)?;

    let rows: Vec<DataRow> = data
        .iter()
        .filter_map(|item| item.as_object())
        .map(|obj| {
            DataRow::from_pairs(
                obj.iter()
                    .map(|(key, value)| (key.clone(), DataValue::from_json(value))),
            )
        })
        .collect();

    let mut column_types = vec![DataType::Null; names.len()];
    for row in rows.iter().take(SAMPLE_SIZE) {
        for (col_idx, name) in names.iter().enumerate() {
            let value = row.get(name);
            if !value.is_null() {
                column_types[col_idx] = column_types[col_idx].merge(&value.data_type());
            }
        }
    }

    let mut table = DataTable::keyed_by(table_name, id_field.clone());
    table
        .metadata
        .insert("source_type".to_string(), "json".to_string());
    for (idx, row) in rows.into_iter().enumerate() {
        table
            .insert(row)
            .with_context(|| format!("JSON object {} rejected", idx))?;
    }

    info!(table = table_name, rows = table.len(), "Loaded JSON");
    let columns = build_columns(&names, &column_types, &id_field);
    Ok(LoadedData { table, columns })
}
