use anyhow::{anyhow, bail, Context, Result};
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use std::path::Path;
use std::rc::Rc;

use grid_engine::config::config::EngineConfig;
use grid_engine::core::edit_manager::CellEdit;
use grid_engine::data::data_exporter::{DataExporter, ExportFormat};
use grid_engine::data::datatable::{DataValue, RowId};
use grid_engine::data::datatable_loaders::{
    load_csv_to_datatable, load_json_to_datatable, LoadedData,
};
use grid_engine::data::filter::{FilterCriterion, FilterOperator};
use grid_engine::data::query_engine::SearchMode;
use grid_engine::data::sort::{SortCriterion, SortDirection};
use grid_engine::persistence::AcceptAllPersister;
use grid_engine::ui::cell_renderer::{Alignment, RenderContext, RendererSet};
use grid_engine::utils::logging::init_tracing;
use grid_engine::{Command, ComputedView, DispatchOutcome, ExportScope, GridEngine};

const USAGE: &str = "\
Usage: grid-cli <file.csv|file.json> [options]

Options:
  --id <field>              Row id field (default: first column)
  --search <text>           Global search over visible columns
  --fuzzy                   Fuzzy instead of substring search
  --filter <col:op:value>   Column filter (repeatable); op is equals, contains,
                            startsWith, endsWith, gt, lt, gte or lte
  --sort <col[:asc|desc]>   Sort criterion (repeatable, first wins)
  --group-by <col>          Group rows and print group aggregates
  --page <n>                1-based page to print
  --page-size <n>           Rows per page
  --set <id:field:value>    Edit a cell before printing (repeatable)
  --export <csv|json|excel> Print the filtered rows in that format
  --output <dir>            Write the export to a file in <dir>
  --generate-config         Write a commented default config file
";

/// All values following each occurrence of `flag`
fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
        .collect()
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    flag_values(args, flag).into_iter().next()
}

fn parse_number(args: &[String], flag: &str) -> Result<Option<usize>> {
    flag_value(args, flag)
        .map(|v| {
            v.parse::<usize>()
                .with_context(|| format!("{} expects a number, got '{}'", flag, v))
        })
        .transpose()
}

fn parse_filter(arg: &str) -> Result<FilterCriterion> {
    let mut parts = arg.splitn(3, ':');
    let (Some(column), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("Filter '{}' must look like column:operator:value", arg);
    };
    let operator =
        FilterOperator::parse(op).ok_or_else(|| anyhow!("Unknown filter operator '{}'", op))?;
    Ok(FilterCriterion::new(column, operator, value))
}

fn parse_sort(arg: &str) -> Result<SortCriterion> {
    match arg.split_once(':') {
        Some((column, dir)) => {
            let direction = SortDirection::parse(dir)
                .ok_or_else(|| anyhow!("Unknown sort direction '{}'", dir))?;
            Ok(SortCriterion::new(column, direction))
        }
        None => Ok(SortCriterion::asc(arg)),
    }
}

fn parse_edit(arg: &str) -> Result<CellEdit> {
    let mut parts = arg.splitn(3, ':');
    let (Some(id), Some(field), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("Edit '{}' must look like id:field:value", arg);
    };
    let row_id = match id.parse::<i64>() {
        Ok(n) => RowId::Number(n),
        Err(_) => RowId::from(id),
    };
    Ok(CellEdit::new(row_id, field, DataValue::from(value)))
}

fn load_data(path: &str, id_field: Option<&str>) -> Result<LoadedData> {
    let name = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    if path.ends_with(".json") {
        load_json_to_datatable(path, name, id_field)
    } else {
        load_csv_to_datatable(path, name, id_field)
    }
}

/// Config file if one exists; the CLI never creates it implicitly
fn load_config() -> EngineConfig {
    match EngineConfig::get_config_path() {
        Ok(path) if path.exists() => EngineConfig::load_from(&path).unwrap_or_else(|e| {
            eprintln!("Ignoring config {}: {:#}", path.display(), e);
            EngineConfig::default()
        }),
        _ => EngineConfig::default(),
    }
}

fn generate_config() -> Result<()> {
    let path = EngineConfig::get_config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating config directory {}", parent.display()))?;
    }
    std::fs::write(&path, EngineConfig::create_default_with_comments())?;
    println!("Configuration file created at: {:?}", path);
    Ok(())
}

fn display_view(engine: &GridEngine, view: &ComputedView) {
    if view.rows.is_empty() {
        println!("No rows match.");
        return;
    }

    let columns = engine.columns().display_order();
    let renderers = RendererSet::new();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        columns
            .iter()
            .map(|c| Cell::new(&c.title).add_attribute(Attribute::Bold)),
    );

    for view_row in &view.rows {
        let cells = columns.iter().map(|column| {
            let ctx = RenderContext {
                column: *column,
                row_id: &view_row.id,
                flags: view_row.flags,
                width: Some(40),
            };
            let fragment = renderers.render(&view_row.row, &ctx);
            let align = match fragment.align {
                Alignment::Right => CellAlignment::Right,
                Alignment::Center => CellAlignment::Center,
                Alignment::Left => CellAlignment::Left,
            };
            Cell::new(fragment.text).set_alignment(align)
        });
        table.add_row(cells);
    }
    println!("{table}");

    if let Some(page) = &view.page {
        println!(
            "\nPage {} of {} ({} matching rows)",
            page.page_index,
            page.total_pages.max(1),
            view.total_count
        );
    }
}

fn display_groups(view: &ComputedView) {
    if view.groups.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Group").add_attribute(Attribute::Bold),
        Cell::new("Rows").add_attribute(Attribute::Bold),
        Cell::new("Aggregates").add_attribute(Attribute::Bold),
    ]);
    for group in &view.groups {
        let aggregates = group
            .aggregates
            .iter()
            .map(|(column, value)| format!("{}={:.2}", column, value))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&group.key),
            Cell::new(group.len()).set_alignment(CellAlignment::Right),
            Cell::new(aggregates),
        ]);
    }
    println!("{table}");
}

async fn run(args: &[String]) -> Result<()> {
    let Some(path) = args
        .iter()
        .skip(1)
        .find(|a| a.ends_with(".csv") || a.ends_with(".json"))
    else {
        eprint!("{}", USAGE);
        bail!("No data file given");
    };

    let loaded = load_data(path, flag_value(args, "--id"))?;
    let mut config = load_config();
    if args.iter().any(|a| a == "--fuzzy") {
        config.query.search_mode = SearchMode::Fuzzy;
    }

    let mut engine = GridEngine::builder(loaded.table, loaded.columns)
        .config(config)
        .persister(Rc::new(AcceptAllPersister))
        .build();

    for arg in flag_values(args, "--set") {
        let edit = parse_edit(arg)?;
        if let DispatchOutcome::Rejected(err) = engine.dispatch(Command::Edit(edit)) {
            bail!("Edit '{}' rejected: {}", arg, err);
        }
    }
    let report = engine.commit_all().await;
    for (row_id, field, err) in &report.failed {
        eprintln!("Edit of {} on row {} failed: {}", field, row_id, err);
    }

    if let Some(search) = flag_value(args, "--search") {
        engine.dispatch(Command::Search(search.to_string()));
    }
    for arg in flag_values(args, "--filter") {
        engine.dispatch(Command::Filter(parse_filter(arg)?));
    }
    let sorts = flag_values(args, "--sort")
        .into_iter()
        .map(parse_sort)
        .collect::<Result<Vec<_>>>()?;
    if !sorts.is_empty() {
        engine.dispatch(Command::Sort(sorts));
    }
    if let Some(column) = flag_value(args, "--group-by") {
        engine.dispatch(Command::GroupBy(Some(column.to_string())));
    }
    if let Some(size) = parse_number(args, "--page-size")? {
        engine.dispatch(Command::PageSize(size));
    }
    if let Some(page) = parse_number(args, "--page")? {
        engine.dispatch(Command::Page(page));
    }

    if let Some(format) = flag_value(args, "--export") {
        let format = ExportFormat::parse(format)
            .ok_or_else(|| anyhow!("Unknown export format '{}'", format))?;
        let contents = engine.export(format, ExportScope::Filtered, &DataExporter)?;
        match flag_value(args, "--output") {
            Some(dir) => {
                let written = DataExporter::write_to_dir(&contents, format, Path::new(dir))?;
                println!("Exported to {}", written.display());
            }
            None => print!("{}", contents),
        }
        return Ok(());
    }

    let view = engine.compute_view();
    for error in &view.diagnostics.errors {
        eprintln!("warning: {}", error);
    }
    display_view(&engine, &view);
    display_groups(&view);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print!("{}", USAGE);
        return Ok(());
    }
    if args.iter().any(|a| a == "--generate-config") {
        return generate_config();
    }

    init_tracing("warn", true);
    run(&args).await
}
