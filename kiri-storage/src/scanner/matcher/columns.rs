//! Column tracking for the match policies: which qualifiers a scan wants
//! and how many versions of each it has emitted.

use std::collections::BTreeSet;

use bytes::Bytes;

use kiri_core::Cell;

use super::MatchCode;

/// Outcome of checking a cell's qualifier against the wanted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnCheck {
    /// The column is wanted; go on to version counting.
    Wanted,
    SeekNextCol,
    SeekNextRow,
}

pub(crate) enum ColumnTracker {
    Wildcard(WildcardColumns),
    Explicit(ExplicitColumns),
}

impl ColumnTracker {
    pub(crate) fn new(columns: Option<&BTreeSet<Bytes>>, max_versions: u32) -> Self {
        match columns {
            Some(cols) if !cols.is_empty() => ColumnTracker::Explicit(ExplicitColumns {
                wanted: cols.iter().cloned().collect(),
                index: 0,
                count: 0,
                max_versions,
            }),
            _ => ColumnTracker::Wildcard(WildcardColumns {
                current: None,
                count: 0,
                max_versions,
            }),
        }
    }

    /// Re-arm for a new row.
    pub(crate) fn reset(&mut self) {
        match self {
            ColumnTracker::Wildcard(t) => {
                t.current = None;
                t.count = 0;
            }
            ColumnTracker::Explicit(t) => {
                t.index = 0;
                t.count = 0;
            }
        }
    }

    pub(crate) fn check_column(&mut self, cell: &Cell) -> ColumnCheck {
        match self {
            ColumnTracker::Wildcard(t) => {
                if t.current.as_ref() != Some(&cell.qualifier) {
                    t.current = Some(cell.qualifier.clone());
                    t.count = 0;
                }
                ColumnCheck::Wanted
            }
            ColumnTracker::Explicit(t) => loop {
                let Some(wanted) = t.wanted.get(t.index) else {
                    return ColumnCheck::SeekNextRow;
                };
                match cell.qualifier.cmp(wanted) {
                    std::cmp::Ordering::Equal => return ColumnCheck::Wanted,
                    // The cell is before the column we are waiting for.
                    std::cmp::Ordering::Less => return ColumnCheck::SeekNextCol,
                    std::cmp::Ordering::Greater => {
                        t.index += 1;
                        t.count = 0;
                    }
                }
            },
        }
    }

    /// Versions already accepted for the cell's column.
    pub(crate) fn current_count(&self) -> u32 {
        match self {
            ColumnTracker::Wildcard(t) => t.count,
            ColumnTracker::Explicit(t) => t.count,
        }
    }

    /// Count the cell as an accepted version and say how to proceed.
    pub(crate) fn check_versions(&mut self, _cell: &Cell) -> MatchCode {
        match self {
            ColumnTracker::Wildcard(t) => {
                t.count += 1;
                if t.count > t.max_versions {
                    MatchCode::SeekNextCol
                } else {
                    // A wildcard tracker cannot know where the column ends,
                    // so the overflow cell triggers the seek instead.
                    MatchCode::Include
                }
            }
            ColumnTracker::Explicit(t) => {
                t.count += 1;
                if t.count >= t.max_versions {
                    t.index += 1;
                    t.count = 0;
                    if t.index >= t.wanted.len() {
                        MatchCode::IncludeAndSeekNextRow
                    } else {
                        MatchCode::IncludeAndSeekNextCol
                    }
                } else {
                    MatchCode::Include
                }
            }
        }
    }

    /// Non-include directive that makes the most forward progress.
    pub(crate) fn next_row_or_next_col(&self, _cell: &Cell) -> MatchCode {
        match self {
            ColumnTracker::Wildcard(_) => MatchCode::SeekNextCol,
            ColumnTracker::Explicit(t) => {
                if t.index + 1 >= t.wanted.len() {
                    MatchCode::SeekNextRow
                } else {
                    MatchCode::SeekNextCol
                }
            }
        }
    }

    /// No wanted column remains in this row.
    pub(crate) fn done(&self) -> bool {
        match self {
            ColumnTracker::Wildcard(_) => false,
            ColumnTracker::Explicit(t) => t.index >= t.wanted.len(),
        }
    }

    /// Key addressing the position just past the cell's column.
    pub(crate) fn key_for_next_column(&self, cell: &Cell) -> Cell {
        match self {
            ColumnTracker::Wildcard(_) => {
                Cell::last_on_row_col(cell.row.clone(), cell.qualifier.clone())
            }
            ColumnTracker::Explicit(t) => {
                let next = t
                    .wanted
                    .iter()
                    .find(|wanted| wanted.as_ref() > cell.qualifier.as_ref());
                match next {
                    Some(qualifier) => Cell::first_on_row_col(cell.row.clone(), qualifier.clone()),
                    None => Cell::last_on_row(cell.row.clone()),
                }
            }
        }
    }

    /// Detach retained qualifier bytes from scanner-owned buffers.
    pub(crate) fn before_shipped(&mut self) {
        if let ColumnTracker::Wildcard(t) = self {
            if let Some(current) = &t.current {
                t.current = Some(Bytes::copy_from_slice(current));
            }
        }
    }
}

pub(crate) struct WildcardColumns {
    current: Option<Bytes>,
    count: u32,
    max_versions: u32,
}

pub(crate) struct ExplicitColumns {
    wanted: Vec<Bytes>,
    index: usize,
    count: u32,
    max_versions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(qual: &str, ts: u64) -> Cell {
        Cell::put(b"r".to_vec(), qual.as_bytes().to_vec(), ts, Bytes::new())
    }

    fn explicit(cols: &[&str], max_versions: u32) -> ColumnTracker {
        let set: BTreeSet<Bytes> = cols
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_bytes()))
            .collect();
        ColumnTracker::new(Some(&set), max_versions)
    }

    #[test]
    fn test_wildcard_version_overflow_seeks_next_col() {
        let mut tracker = ColumnTracker::new(None, 2);
        assert_eq!(tracker.check_column(&put("c1", 9)), ColumnCheck::Wanted);
        assert_eq!(tracker.check_versions(&put("c1", 9)), MatchCode::Include);
        assert_eq!(tracker.check_versions(&put("c1", 8)), MatchCode::Include);
        assert_eq!(tracker.check_versions(&put("c1", 7)), MatchCode::SeekNextCol);
        // A new qualifier resets the count.
        assert_eq!(tracker.check_column(&put("c2", 9)), ColumnCheck::Wanted);
        assert_eq!(tracker.check_versions(&put("c2", 9)), MatchCode::Include);
    }

    #[test]
    fn test_explicit_skips_unwanted_columns() {
        let mut tracker = explicit(&["c2", "c4"], 1);
        assert_eq!(tracker.check_column(&put("c1", 1)), ColumnCheck::SeekNextCol);
        assert_eq!(tracker.check_column(&put("c2", 1)), ColumnCheck::Wanted);
        // Past every wanted column: give up on the row.
        assert_eq!(tracker.check_column(&put("c5", 1)), ColumnCheck::SeekNextRow);
    }

    #[test]
    fn test_explicit_last_column_completion_seeks_next_row() {
        let mut tracker = explicit(&["c1"], 1);
        assert_eq!(tracker.check_column(&put("c1", 5)), ColumnCheck::Wanted);
        assert_eq!(
            tracker.check_versions(&put("c1", 5)),
            MatchCode::IncludeAndSeekNextRow
        );
        assert!(tracker.done());
    }

    #[test]
    fn test_explicit_key_for_next_column() {
        let tracker = explicit(&["c1", "c3"], 1);
        let key = tracker.key_for_next_column(&put("c1", 5));
        assert_eq!(key.qualifier, Bytes::from_static(b"c3"));
        let last = tracker.key_for_next_column(&put("c3", 5));
        assert!(last.is_last_on_row());
    }
}
