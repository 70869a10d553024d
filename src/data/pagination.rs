//! Page-based windowing over the ordered rows

use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// One page of the ordered output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSlice {
    /// Index range into the ordered rows
    pub range: Range<usize>,
    /// 1-based page actually served (after clamping)
    pub page_index: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total: usize,
    /// True when the requested page was out of range
    pub clamped: bool,
}

impl PageSlice {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Slice `total` ordered rows into pages of `page_size`.
///
/// `page_index` is 1-based and clamps into `[1, total_pages]`; an empty
/// dataset still reports page 1 of 0 with an empty range.
pub fn page(total: usize, page_index: usize, page_size: usize) -> PageSlice {
    let page_size = page_size.max(1);
    let total_pages = total.div_ceil(page_size);
    let clamped_index = page_index.clamp(1, total_pages.max(1));

    let start = ((clamped_index - 1) * page_size).min(total);
    let end = (start + page_size).min(total);

    PageSlice {
        range: start..end,
        page_index: clamped_index,
        page_size,
        total_pages,
        total,
        clamped: clamped_index != page_index,
    }
}

/// Current page position of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    page_index: usize,
    page_size: usize,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_index: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Slice for the current position; stores the clamped index back
    pub fn slice(&mut self, total: usize) -> PageSlice {
        let slice = page(total, self.page_index, self.page_size);
        if slice.clamped {
            debug!(
                requested = self.page_index,
                served = slice.page_index,
                "Clamped page index"
            );
        }
        self.page_index = slice.page_index;
        slice
    }

    pub fn set_page(&mut self, page_index: usize, total: usize) -> usize {
        self.page_index = page(total, page_index, self.page_size).page_index;
        self.page_index
    }

    pub fn next_page(&mut self, total: usize) -> usize {
        self.set_page(self.page_index + 1, total)
    }

    pub fn prev_page(&mut self, total: usize) -> usize {
        self.set_page(self.page_index.saturating_sub(1), total)
    }

    /// Changing the page size always returns to the first page
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page_index = 1;
    }

    /// Back to page 1 (query changes)
    pub fn reset(&mut self) {
        self.page_index = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_ranges() {
        let second = page(250, 2, 100);
        assert_eq!(second.range, 100..200);
        assert_eq!(second.total_pages, 3);

        let last = page(250, 3, 100);
        assert_eq!(last.range, 200..250);
        assert!(!last.clamped);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let high = page(250, 9, 100);
        assert_eq!(high.page_index, 3);
        assert!(high.clamped);

        let low = page(250, 0, 100);
        assert_eq!(low.page_index, 1);
        assert_eq!(low.range, 0..100);
    }

    #[test]
    fn test_empty_dataset() {
        let empty = page(0, 4, 25);
        assert_eq!(empty.page_index, 1);
        assert_eq!(empty.total_pages, 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_page_size_change_resets_to_first_page() {
        let mut pager = Pager::new(10);
        pager.set_page(4, 100);
        assert_eq!(pager.page_index(), 4);

        pager.set_page_size(25);
        assert_eq!(pager.page_index(), 1);
        assert_eq!(pager.slice(100).range, 0..25);
    }

    #[test]
    fn test_pager_navigation_clamps() {
        let mut pager = Pager::new(10);
        assert_eq!(pager.prev_page(35), 1);
        assert_eq!(pager.next_page(35), 2);
        pager.set_page(4, 35);
        assert_eq!(pager.next_page(35), 4);
    }
}
