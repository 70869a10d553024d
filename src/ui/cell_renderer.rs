use std::collections::HashMap;

use crate::core::selection_manager::RowFlags;
use crate::data::column::{ColumnDef, ColumnType};
use crate::data::datatable::{DataRow, DataValue, RowId};

/// Horizontal alignment hint for the painter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
    Center,
}

/// Presentation-neutral emphasis; the host maps these to colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTone {
    Normal,
    Muted,
    Emphasis,
    Positive,
    Negative,
}

/// What a renderer produces for one cell
#[derive(Debug, Clone, PartialEq)]
pub struct ViewFragment {
    pub text: String,
    pub align: Alignment,
    pub tone: CellTone,
}

impl ViewFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            align: Alignment::Left,
            tone: CellTone::Normal,
        }
    }

    pub fn aligned(mut self, align: Alignment) -> Self {
        self.align = align;
        self
    }

    pub fn tone(mut self, tone: CellTone) -> Self {
        self.tone = tone;
        self
    }
}

/// Everything a renderer may look at besides the value and row
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub column: &'a ColumnDef,
    pub row_id: &'a RowId,
    pub flags: RowFlags,
    /// Maximum width in characters, if the host has one
    pub width: Option<usize>,
}

pub trait CellRenderer {
    fn render(&self, value: &DataValue, row: &DataRow, ctx: &RenderContext<'_>) -> ViewFragment;
}

impl<F> CellRenderer for F
where
    F: Fn(&DataValue, &DataRow, &RenderContext<'_>) -> ViewFragment,
{
    fn render(&self, value: &DataValue, row: &DataRow, ctx: &RenderContext<'_>) -> ViewFragment {
        self(value, row, ctx)
    }
}

/// Fallback renderer keyed on the column type
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCellRenderer;

impl CellRenderer for DefaultCellRenderer {
    fn render(&self, value: &DataValue, _row: &DataRow, ctx: &RenderContext<'_>) -> ViewFragment {
        if value.is_null() {
            return ViewFragment::text("").tone(CellTone::Muted);
        }

        let text = ctx.column.format(value);
        let fragment = match ctx.column.column_type {
            ColumnType::Number => {
                let tone = match value.as_f64() {
                    Some(n) if n < 0.0 => CellTone::Negative,
                    _ => CellTone::Normal,
                };
                ViewFragment::text(text).aligned(Alignment::Right).tone(tone)
            }
            ColumnType::Boolean => {
                let tone = match value {
                    DataValue::Boolean(true) => CellTone::Positive,
                    _ => CellTone::Muted,
                };
                ViewFragment::text(text).aligned(Alignment::Center).tone(tone)
            }
            ColumnType::Date => {
                let text = value
                    .as_instant()
                    .map(|instant| instant.format("%Y-%m-%d").to_string())
                    .unwrap_or(text);
                ViewFragment::text(text)
            }
            ColumnType::Select => ViewFragment::text(text).tone(CellTone::Emphasis),
            ColumnType::Text => ViewFragment::text(text),
        };

        match ctx.width {
            Some(width) => truncate(fragment, width),
            None => fragment,
        }
    }
}

fn truncate(mut fragment: ViewFragment, width: usize) -> ViewFragment {
    if fragment.text.chars().count() > width {
        let keep = width.saturating_sub(1);
        let mut text: String = fragment.text.chars().take(keep).collect();
        if width > 0 {
            text.push('…');
        }
        fragment.text = text;
    }
    fragment
}

/// Per-column renderer overrides with the type-based fallback
#[derive(Default)]
pub struct RendererSet {
    overrides: HashMap<String, Box<dyn CellRenderer>>,
    fallback: DefaultCellRenderer,
}

impl RendererSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, column_id: impl Into<String>, renderer: Box<dyn CellRenderer>) {
        self.overrides.insert(column_id.into(), renderer);
    }

    pub fn render(&self, row: &DataRow, ctx: &RenderContext<'_>) -> ViewFragment {
        let value = ctx.column.value(row);
        match self.overrides.get(&ctx.column.id) {
            Some(renderer) => renderer.render(value, row, ctx),
            None => self.fallback.render(value, row, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(column: &'a ColumnDef, id: &'a RowId, width: Option<usize>) -> RenderContext<'a> {
        RenderContext {
            column,
            row_id: id,
            flags: RowFlags::default(),
            width,
        }
    }

    #[test]
    fn test_type_fallbacks() {
        let id = RowId::Number(1);
        let row = DataRow::new()
            .with("salary", -1250.5)
            .with("active", true)
            .with("joined", "2023-04-05T10:00:00Z")
            .with("name", DataValue::Null);

        let renderers = RendererSet::new();
        let salary = ColumnDef::new("salary", ColumnType::Number);
        let frag = renderers.render(&row, &ctx(&salary, &id, None));
        assert_eq!(frag.align, Alignment::Right);
        assert_eq!(frag.tone, CellTone::Negative);
        assert_eq!(frag.text, "-1250.50");

        let active = ColumnDef::new("active", ColumnType::Boolean);
        assert_eq!(renderers.render(&row, &ctx(&active, &id, None)).text, "Yes");

        let joined = ColumnDef::new("joined", ColumnType::Date);
        assert_eq!(renderers.render(&row, &ctx(&joined, &id, None)).text, "2023-04-05");

        let name = ColumnDef::new("name", ColumnType::Text);
        assert_eq!(renderers.render(&row, &ctx(&name, &id, None)).tone, CellTone::Muted);
    }

    #[test]
    fn test_override_and_truncation() {
        let id = RowId::from("x");
        let row = DataRow::new().with("status", "Inactive");
        let status = ColumnDef::new("status", ColumnType::Select);

        let mut renderers = RendererSet::new();
        assert_eq!(renderers.render(&row, &ctx(&status, &id, Some(5))).text, "Inac…");

        renderers.register(
            "status",
            Box::new(|value: &DataValue, _: &DataRow, _: &RenderContext<'_>| {
                ViewFragment::text(format!("[{}]", value)).tone(CellTone::Emphasis)
            }),
        );
        assert_eq!(renderers.render(&row, &ctx(&status, &id, None)).text, "[Inactive]");
    }
}
