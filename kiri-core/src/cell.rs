//! # Cell Model
//!
//! The logical record of a column family: row, qualifier, timestamp, kind,
//! value, plus the MVCC write sequence. Cells are cheap to clone (the byte
//! fields are reference-counted `Bytes`), so scanners pass them around
//! freely and only deep-copy at ownership boundaries.
//!
//! ## Ordering
//!
//! The store comparator orders cells by row ascending, qualifier ascending,
//! timestamp *descending* (newest version first), then kind. Two artificial
//! kinds exist purely for seek keys: `Maximum` sorts before every real cell
//! at the same coordinate, `Minimum` after.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

/// Fixed per-cell overhead used by the serialized-size estimate: lengths,
/// timestamp, kind and sequence fields of the on-wire shape.
const CELL_FIXED_OVERHEAD: usize = 8 + 8 + 4 + 4 + 1;

/// Kind of a cell. The two artificial kinds never appear in stored data;
/// they exist so seek keys can sort before or after real cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Artificial: sorts before any real cell at the same coordinate.
    Maximum,
    /// Tombstone covering the whole row at and below its timestamp.
    DeleteFamily,
    /// Tombstone covering one column at and below its timestamp.
    DeleteColumn,
    /// Tombstone covering exactly one version.
    Delete,
    /// A regular value.
    Put,
    /// Artificial: sorts after any real cell at the same coordinate.
    Minimum,
}

impl CellKind {
    /// True for the three tombstone kinds.
    pub fn is_delete(self) -> bool {
        matches!(
            self,
            CellKind::DeleteFamily | CellKind::DeleteColumn | CellKind::Delete
        )
    }

    fn rank(self) -> u8 {
        match self {
            CellKind::Maximum => 0,
            CellKind::DeleteFamily => 1,
            CellKind::DeleteColumn => 2,
            CellKind::Delete => 3,
            CellKind::Put => 4,
            CellKind::Minimum => 5,
        }
    }
}

/// A single versioned cell.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    pub row: Bytes,
    pub qualifier: Bytes,
    pub timestamp: u64,
    pub kind: CellKind,
    pub value: Bytes,
    /// MVCC write number. Cells with a sequence above a scanner's read
    /// point are invisible to it.
    pub sequence: u64,
}

impl Cell {
    pub fn new(
        row: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        kind: CellKind,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            qualifier: qualifier.into(),
            timestamp,
            kind,
            value: value.into(),
            sequence: 0,
        }
    }

    pub fn put(
        row: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        timestamp: u64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self::new(row, qualifier, timestamp, CellKind::Put, value)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Artificial key sorting before every cell of `row`.
    pub fn first_on_row(row: Bytes) -> Self {
        Self {
            row,
            qualifier: Bytes::new(),
            timestamp: u64::MAX,
            kind: CellKind::Maximum,
            value: Bytes::new(),
            sequence: 0,
        }
    }

    /// Artificial key sorting after every cell of `row`.
    pub fn last_on_row(row: Bytes) -> Self {
        Self {
            row,
            qualifier: Bytes::new(),
            timestamp: 0,
            kind: CellKind::Minimum,
            value: Bytes::new(),
            sequence: 0,
        }
    }

    /// Artificial key sorting before every version of `(row, qualifier)`.
    pub fn first_on_row_col(row: Bytes, qualifier: Bytes) -> Self {
        Self {
            row,
            qualifier,
            timestamp: u64::MAX,
            kind: CellKind::Maximum,
            value: Bytes::new(),
            sequence: 0,
        }
    }

    /// Artificial key sorting after every version of `(row, qualifier)`.
    pub fn last_on_row_col(row: Bytes, qualifier: Bytes) -> Self {
        Self {
            row,
            qualifier,
            timestamp: 0,
            kind: CellKind::Minimum,
            value: Bytes::new(),
            sequence: 0,
        }
    }

    /// True if this is a `last_on_row` style artificial key.
    pub fn is_last_on_row(&self) -> bool {
        self.kind == CellKind::Minimum && self.qualifier.is_empty()
    }

    pub fn same_row(&self, other: &Cell) -> bool {
        self.row == other.row
    }

    pub fn same_row_column(&self, other: &Cell) -> bool {
        self.row == other.row && self.qualifier == other.qualifier
    }

    /// Estimated on-wire size, used for size limits and the pread switch
    /// threshold.
    pub fn serialized_size(&self) -> usize {
        CELL_FIXED_OVERHEAD + self.row.len() + self.qualifier.len() + self.value.len()
    }

    /// Estimated in-memory footprint.
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Cell>() + self.row.len() + self.qualifier.len() + self.value.len()
    }

    /// Copy the cell into freshly owned buffers, detaching it from whatever
    /// backing storage (block, memstore chunk) currently holds its bytes.
    pub fn deep_copy(&self) -> Cell {
        Cell {
            row: Bytes::copy_from_slice(&self.row),
            qualifier: Bytes::copy_from_slice(&self.qualifier),
            timestamp: self.timestamp,
            kind: self.kind,
            value: Bytes::copy_from_slice(&self.value),
            sequence: self.sequence,
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/ts={}/{:?}/seq={}",
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.qualifier),
            self.timestamp,
            self.kind,
            self.sequence,
        )
    }
}

/// The store comparator: row asc, qualifier asc, timestamp desc, kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellComparator;

impl CellComparator {
    pub fn compare(&self, a: &Cell, b: &Cell) -> Ordering {
        let ord = a.row.cmp(&b.row);
        if ord != Ordering::Equal {
            return ord;
        }
        // A last-on-row key sorts after every real cell of its row even
        // though its qualifier is empty.
        match (a.is_last_on_row(), b.is_last_on_row()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        let ord = a.qualifier.cmp(&b.qualifier);
        if ord != Ordering::Equal {
            return ord;
        }
        let ord = b.timestamp.cmp(&a.timestamp);
        if ord != Ordering::Equal {
            return ord;
        }
        a.kind.rank().cmp(&b.kind.rank())
    }

    pub fn compare_rows(&self, a: &Cell, b: &Cell) -> Ordering {
        a.row.cmp(&b.row)
    }
}
