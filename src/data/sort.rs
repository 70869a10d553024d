use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::data::datatable::DataValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// How toggling a column interacts with existing sort criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// One criterion at a time; toggling another column replaces it
    #[default]
    Single,
    /// Toggling appends or updates within the criteria list
    Multi,
}

/// Caller supplied comparator. An `Err` treats the pair as equal and is reported.
pub type CustomComparator =
    Arc<dyn Fn(&DataValue, &DataValue) -> Result<Ordering, String> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct SortCriterion {
    pub column: String,
    pub direction: SortDirection,
    #[serde(skip)]
    comparator: Option<CustomComparator>,
}

impl fmt::Debug for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortCriterion")
            .field("column", &self.column)
            .field("direction", &self.direction)
            .field("custom", &self.comparator.is_some())
            .finish()
    }
}

impl PartialEq for SortCriterion {
    fn eq(&self, other: &Self) -> bool {
        self.column == other.column && self.direction == other.direction
    }
}

impl SortCriterion {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
            comparator: None,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }

    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&DataValue, &DataValue) -> Result<Ordering, String> + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    pub fn comparator(&self) -> Option<&CustomComparator> {
        self.comparator.as_ref()
    }
}

/// Ordered list of sort criteria; earlier criteria take precedence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortState {
    criteria: Vec<SortCriterion>,
}

impl SortState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn direction_of(&self, column: &str) -> Option<SortDirection> {
        self.criteria
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.direction)
    }

    /// Cycle a column through absent -> asc -> desc -> absent.
    ///
    /// In `Single` mode every other criterion is dropped; in `Multi` mode the
    /// column keeps its slot in the list (or is appended). Returns the new
    /// direction for the column, `None` when it was removed.
    pub fn toggle(&mut self, column: &str, mode: SortMode) -> Option<SortDirection> {
        let next = match self.direction_of(column) {
            None => Some(SortDirection::Asc),
            Some(SortDirection::Asc) => Some(SortDirection::Desc),
            Some(SortDirection::Desc) => None,
        };

        if mode == SortMode::Single {
            self.criteria.retain(|c| c.column == column);
        }

        match next {
            Some(direction) => match self.criteria.iter_mut().find(|c| c.column == column) {
                Some(existing) => existing.direction = direction,
                None => self.criteria.push(SortCriterion::new(column, direction)),
            },
            None => self.criteria.retain(|c| c.column != column),
        }

        debug!(column, ?next, ?mode, "Toggled sort");
        next
    }

    /// Set a criterion explicitly, keeping its position if already present
    pub fn set(&mut self, criterion: SortCriterion) {
        match self
            .criteria
            .iter_mut()
            .find(|c| c.column == criterion.column)
        {
            Some(existing) => *existing = criterion,
            None => self.criteria.push(criterion),
        }
    }

    pub fn remove(&mut self, column: &str) -> bool {
        let before = self.criteria.len();
        self.criteria.retain(|c| c.column != column);
        before != self.criteria.len()
    }

    pub fn clear(&mut self) {
        self.criteria.clear();
    }

    pub fn persistable(&self) -> Vec<SortCriterion> {
        self.criteria
            .iter()
            .filter(|c| c.comparator.is_none())
            .cloned()
            .collect()
    }
}

impl FromIterator<SortCriterion> for SortState {
    fn from_iter<T: IntoIterator<Item = SortCriterion>>(iter: T) -> Self {
        let mut state = SortState::new();
        for criterion in iter {
            state.set(criterion);
        }
        state
    }
}
