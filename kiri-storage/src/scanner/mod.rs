//! # Row-Merge Scanner
//!
//! The read core of a column family: a set of per-source cursors
//! (`SourceScanner`) merged through a min-heap (`MergeHeap`), classified
//! cell by cell by a match policy, and orchestrated by `StoreScanner`.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────┐
//!  │                    StoreScanner                      │
//!  ├──────────────────────────────────────────────────────┤
//!  │   next(out, progress)                                │
//!  │      │                                               │
//!  │      ▼                                               │
//!  │   MergeHeap ──peek──> ScanPolicy ──MatchCode──┐      │
//!  │    │  │  │                                    │      │
//!  │    ▼  ▼  ▼                     include / skip │      │
//!  │  file file memstore                / seek     ▼      │
//!  │  scanner scanner scanner              out: Vec<Cell> │
//!  └──────────────────────────────────────────────────────┘
//! ```

pub mod heap;
pub mod matcher;
pub mod parallel;
pub mod progress;
pub mod select;
pub mod store_scanner;

#[cfg(test)]
pub(crate) mod testutil;

pub use heap::MergeHeap;
pub use matcher::{MatchCode, ScanPolicy};
pub use parallel::parallel_seek;
pub use progress::{LimitScope, NextState, ScanProgress};
pub use select::select_scanners;
pub use store_scanner::StoreScanner;

use kiri_core::{Cell, Result};

use crate::scan::ScanSpec;

/// Cursor over a single source: one file or one memstore segment.
///
/// A scanner is unpositioned until the first `seek`; `peek` then returns
/// the current cell until a mutating call moves it. Implementations fail
/// with `Io`, `Corrupt` or `Interrupted` errors only.
pub trait SourceScanner: Send {
    /// Current cell, `None` once the source is exhausted. Idempotent.
    fn peek(&self) -> Option<&Cell>;

    /// Discard the current cell and move to the next one.
    fn advance(&mut self) -> Result<()>;

    /// Position at the first cell `>= key`. Returns whether a cell was
    /// found.
    fn seek(&mut self, key: &Cell) -> Result<bool>;

    /// Like `seek`, but the caller guarantees `key` is at or past the
    /// current position, so implementations may search forward only.
    fn reseek(&mut self, key: &Cell) -> Result<bool>;

    /// A seek the source may elide: if a bloom filter proves no cell
    /// `>= key` exists here, the scanner may move straight to its end
    /// state instead of touching blocks.
    fn request_seek(&mut self, key: &Cell, _forward: bool, _use_bloom: bool) -> Result<bool> {
        self.seek(key)
    }

    /// Key at the next sparse-index entry (first key of the next block).
    /// `None` for memstore sources and past the last block.
    fn next_indexed_key(&self) -> Option<&Cell> {
        None
    }

    fn is_file_scanner(&self) -> bool {
        false
    }

    /// Backing file name, for sources that have one.
    fn file_name(&self) -> Option<&str> {
        None
    }

    /// May this source contribute any cell to the scan? Answered from
    /// bloom filters, timestamp ranges and file metadata without touching
    /// data blocks.
    fn should_use(&self, _scan: &ScanSpec, _ttl_cutoff: Option<u64>) -> bool {
        true
    }

    /// Merge rank among sibling sources; on equal cells the scanner with
    /// the higher order wins (newer sources first).
    fn order(&self) -> u64 {
        0
    }

    /// The caller has secured every cell previously returned; buffers may
    /// be recycled.
    fn shipped(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self);
}
