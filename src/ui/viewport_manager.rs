/// ViewportManager - the virtual row window over a DataView
///
/// Computes which rows of the ordered output must be materialized for the
/// current scroll position, plus the spacer heights that stand in for the
/// rest so the scrollbar stays honest.
///
/// Architecture:
/// DataTable (dataset index)
///     → DataView (searched/filtered/sorted rows)
///         → ViewportManager (visible window)
///             → Renderer (whatever paints the rows)
///
/// Row heights default to an estimate and are replaced by measurements as the
/// renderer reports them, so expanded rows can be taller than the rest.
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, trace};

use crate::data::datatable::RowId;

/// The rows to materialize and the space around them
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRange {
    /// Indices into the ordered output, overscan included
    pub rows: Range<usize>,
    /// First row actually intersecting the viewport
    pub first_visible: usize,
    /// Height above the first materialized row
    pub leading_spacer: f64,
    /// Height below the last materialized row
    pub trailing_spacer: f64,
    pub total_height: f64,
    /// Scroll offset after clamping
    pub scroll_offset: f64,
}

impl WindowRange {
    fn empty() -> Self {
        Self {
            rows: 0..0,
            first_visible: 0,
            leading_spacer: 0.0,
            trailing_spacer: 0.0,
            total_height: 0.0,
            scroll_offset: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The first visible row and how far its top sits from the viewport top
#[derive(Debug, Clone, PartialEq)]
struct ScrollAnchor {
    row_id: RowId,
    delta: f64,
}

#[derive(Debug, Clone)]
pub struct ViewportManager {
    viewport_height: f64,
    estimated_row_height: f64,
    overscan: usize,
    scroll_offset: f64,
    measurements: HashMap<RowId, f64>,
    anchor: Option<ScrollAnchor>,
}

impl ViewportManager {
    pub fn new(viewport_height: f64, estimated_row_height: f64, overscan: usize) -> Self {
        Self {
            viewport_height: viewport_height.max(0.0),
            estimated_row_height: estimated_row_height.max(1.0),
            overscan,
            scroll_offset: 0.0,
            measurements: HashMap::new(),
            anchor: None,
        }
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = height.max(0.0);
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    /// Record the rendered height of a row. Returns true when it changed.
    pub fn measure(&mut self, row_id: &RowId, height: f64) -> bool {
        let height = height.max(0.0);
        let previous = self.measurements.insert(row_id.clone(), height);
        let changed = previous.map_or(true, |p| (p - height).abs() > f64::EPSILON);
        if changed {
            trace!(row = %row_id, height, "Row measured");
        }
        changed
    }

    /// Drop one measurement so the row is re-measured (content changed)
    pub fn forget(&mut self, row_id: &RowId) {
        self.measurements.remove(row_id);
    }

    pub fn forget_measurements(&mut self) {
        self.measurements.clear();
    }

    pub fn row_height(&self, row_id: &RowId) -> f64 {
        self.measurements
            .get(row_id)
            .copied()
            .unwrap_or(self.estimated_row_height)
    }

    pub fn scroll_to(&mut self, offset: f64) {
        self.scroll_offset = offset.max(0.0);
    }

    pub fn scroll_by(&mut self, delta: f64) {
        self.scroll_to(self.scroll_offset + delta);
    }

    /// Put row `index` at the top of the viewport
    pub fn scroll_to_index(&mut self, index: usize, ordered_ids: &[RowId]) {
        let offsets = self.offsets(ordered_ids);
        let index = index.min(ordered_ids.len().saturating_sub(1));
        self.scroll_to(offsets.get(index).copied().unwrap_or(0.0));
    }

    /// Compute the window for the current scroll position and remember the
    /// first visible row as the scroll anchor.
    pub fn compute(&mut self, ordered_ids: &[RowId]) -> WindowRange {
        if ordered_ids.is_empty() {
            self.scroll_offset = 0.0;
            self.anchor = None;
            return WindowRange::empty();
        }

        let offsets = self.offsets(ordered_ids);
        let total = offsets[ordered_ids.len()];
        self.scroll_offset = self.clamp_offset(self.scroll_offset, total);
        let top = self.scroll_offset;
        let bottom = top + self.viewport_height;

        // offsets[0] is 0 and top >= 0, so the partition point is at least 1
        let first_visible = offsets
            .partition_point(|&o| o <= top)
            .saturating_sub(1)
            .min(ordered_ids.len() - 1);
        let last_exclusive = offsets[..ordered_ids.len()]
            .partition_point(|&o| o < bottom)
            .max(first_visible + 1);

        let start = first_visible.saturating_sub(self.overscan);
        let end = (last_exclusive + self.overscan).min(ordered_ids.len());

        self.anchor = Some(ScrollAnchor {
            row_id: ordered_ids[first_visible].clone(),
            delta: offsets[first_visible] - top,
        });

        let window = WindowRange {
            rows: start..end,
            first_visible,
            leading_spacer: offsets[start],
            trailing_spacer: total - offsets[end],
            total_height: total,
            scroll_offset: top,
        };
        trace!(?window.rows, first_visible, "Computed window");
        window
    }

    /// Keep the anchored row at the same on-screen position after the ordered
    /// rows changed (filter, sort, delete, re-measure). Falls back to clamping
    /// the offset when the anchor row is gone. Returns true when anchored.
    pub fn rebase(&mut self, ordered_ids: &[RowId]) -> bool {
        let offsets = self.offsets(ordered_ids);
        let total = offsets[ordered_ids.len()];

        let anchored = self.anchor.as_ref().and_then(|anchor| {
            ordered_ids
                .iter()
                .position(|id| *id == anchor.row_id)
                .map(|index| offsets[index] - anchor.delta)
        });

        match anchored {
            Some(offset) => {
                self.scroll_offset = self.clamp_offset(offset, total);
                debug!(offset = self.scroll_offset, "Rebased viewport on anchor row");
                true
            }
            None => {
                self.scroll_offset = self.clamp_offset(self.scroll_offset, total);
                debug!(offset = self.scroll_offset, "Anchor row gone; clamped viewport");
                false
            }
        }
    }

    /// Prefix sums: `offsets[i]` is the top of row `i`, `offsets[n]` the total height
    fn offsets(&self, ordered_ids: &[RowId]) -> Vec<f64> {
        let mut offsets = Vec::with_capacity(ordered_ids.len() + 1);
        let mut acc = 0.0;
        offsets.push(acc);
        for id in ordered_ids {
            acc += self.row_height(id);
            offsets.push(acc);
        }
        offsets
    }

    fn clamp_offset(&self, offset: f64, total: f64) -> f64 {
        let max = (total - self.viewport_height).max(0.0);
        offset.clamp(0.0, max)
    }
}
