//! Per-row tombstone tracking.
//!
//! Deletes sort before the puts they cover (same coordinate, same
//! timestamp), and rows arrive qualifier-ascending with timestamps
//! descending inside a column, so a single forward pass sees every marker
//! before any cell it shadows.

use bytes::Bytes;

use kiri_core::{Cell, CellKind};

/// How a cell relates to the tombstones seen so far in its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteResult {
    NotDeleted,
    FamilyDeleted,
    ColumnDeleted,
    VersionDeleted,
}

/// Accumulates the delete markers of the current row.
#[derive(Default)]
pub(crate) struct DeleteTracker {
    family_stamp: Option<u64>,
    column: Option<Bytes>,
    column_stamp: Option<u64>,
    version_stamps: Vec<u64>,
}

impl DeleteTracker {
    /// Forget everything; called at each row boundary.
    pub(crate) fn reset(&mut self) {
        *self = DeleteTracker::default();
    }

    pub(crate) fn add(&mut self, cell: &Cell) {
        match cell.kind {
            CellKind::DeleteFamily => {
                self.family_stamp = Some(
                    self.family_stamp
                        .map_or(cell.timestamp, |ts| ts.max(cell.timestamp)),
                );
            }
            CellKind::DeleteColumn => {
                self.switch_column(&cell.qualifier);
                self.column_stamp = Some(
                    self.column_stamp
                        .map_or(cell.timestamp, |ts| ts.max(cell.timestamp)),
                );
            }
            CellKind::Delete => {
                self.switch_column(&cell.qualifier);
                self.version_stamps.push(cell.timestamp);
            }
            _ => {}
        }
    }

    fn switch_column(&mut self, qualifier: &Bytes) {
        if self.column.as_ref() != Some(qualifier) {
            self.column = Some(qualifier.clone());
            self.column_stamp = None;
            self.version_stamps.clear();
        }
    }

    pub(crate) fn is_deleted(&self, cell: &Cell) -> DeleteResult {
        if let Some(stamp) = self.family_stamp {
            if cell.timestamp <= stamp {
                return DeleteResult::FamilyDeleted;
            }
        }
        if self.column.as_ref() == Some(&cell.qualifier) {
            if let Some(stamp) = self.column_stamp {
                if cell.timestamp <= stamp {
                    return DeleteResult::ColumnDeleted;
                }
            }
            if self.version_stamps.contains(&cell.timestamp) {
                return DeleteResult::VersionDeleted;
            }
        }
        DeleteResult::NotDeleted
    }

    /// Detach retained qualifier bytes from scanner-owned buffers.
    pub(crate) fn before_shipped(&mut self) {
        if let Some(column) = &self.column {
            self.column = Some(Bytes::copy_from_slice(column));
        }
    }
}
