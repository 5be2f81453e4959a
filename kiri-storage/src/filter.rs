//! # Scan Filters
//!
//! Optional per-scan predicate consulted by the match policies. Filters are
//! stateful (they may track the current row) and are re-armed at each row
//! boundary via `reset`.

use kiri_core::Cell;

/// What a filter wants done with a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Include,
    IncludeAndNextCol,
    IncludeAndNextRow,
    Skip,
    NextCol,
    NextRow,
    /// Ask the scanner to seek to `next_key_hint`.
    SeekUsingHint,
    /// No later cell can match; the scan is over.
    AllDone,
}

/// Per-scan cell predicate.
pub trait Filter: Send {
    /// Re-arm for a new row.
    fn reset(&mut self) {}

    fn filter_cell(&mut self, _cell: &Cell) -> FilterDecision {
        FilterDecision::Include
    }

    /// Rewrite an included cell before it is handed to the caller.
    fn transform_cell(&self, cell: &Cell) -> Cell {
        cell.clone()
    }

    /// Target for `FilterDecision::SeekUsingHint`.
    fn next_key_hint(&self, _cell: &Cell) -> Option<Cell> {
        None
    }

    /// True once no remaining cell can be included.
    fn filter_all_remaining(&self) -> bool {
        false
    }
}
