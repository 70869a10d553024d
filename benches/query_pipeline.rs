use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grid_engine::data::column::{ColumnDef, ColumnSet, ColumnType};
use grid_engine::data::datatable::{DataRow, DataTable};
use grid_engine::data::filter::{FilterCriterion, FilterOperator};
use grid_engine::data::query_engine::{QueryEngine, QueryState, SearchMode};
use grid_engine::data::sort::SortCriterion;

fn create_test_data(rows: usize) -> (DataTable, ColumnSet) {
    let mut table = DataTable::keyed_by("bench", "id");

    let book_values = [
        "Commodities Trading",
        "Equity Trading",
        "FX Trading",
        "Bond Trading",
        "Derivatives",
        "Options",
        "Futures",
        "ETF Trading",
        "Structured Products",
        "Money Markets",
    ];

    for i in 0..rows {
        let row = DataRow::new()
            .with("id", i as i64)
            .with("book", book_values[i % book_values.len()])
            .with("value", ((i * 7919) % 100_000) as i64)
            .with("status", format!("STATUS_{}", i % 5));
        table.insert(row).unwrap();
    }

    let columns = ColumnSet::new(vec![
        ColumnDef::new("id", ColumnType::Number),
        ColumnDef::new("book", ColumnType::Text),
        ColumnDef::new("value", ColumnType::Number),
        ColumnDef::new("status", ColumnType::Text),
    ]);
    (table, columns)
}

fn benchmark_filter_and_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_sort");

    for rows in [10_000, 100_000] {
        let (table, columns) = create_test_data(rows);
        let mut query = QueryState::default();
        query
            .filters
            .set(FilterCriterion::new("book", FilterOperator::Contains, "trading"));
        query
            .filters
            .set(FilterCriterion::new("value", FilterOperator::Gt, 25_000i64));
        query.sorts = vec![SortCriterion::desc("value"), SortCriterion::asc("status")]
            .into_iter()
            .collect();

        group.bench_function(format!("{}_rows", rows), |b| {
            let engine = QueryEngine::new();
            b.iter(|| {
                let output = engine.compute(&table, &columns, black_box(&query));
                assert!(!output.ordered.is_empty());
            });
        });
    }

    group.finish();
}

fn benchmark_search(c: &mut Criterion) {
    let (table, columns) = create_test_data(50_000);
    let mut group = c.benchmark_group("search");

    for mode in [SearchMode::Substring, SearchMode::Fuzzy] {
        let query = QueryState {
            search: "deriv".to_string(),
            search_mode: mode,
            ..QueryState::default()
        };
        group.bench_function(format!("{:?}", mode), |b| {
            let engine = QueryEngine::new();
            b.iter(|| engine.compute(&table, &columns, black_box(&query)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_filter_and_sort, benchmark_search);
criterion_main!(benches);
