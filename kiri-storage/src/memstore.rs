//! # MemStore Segment
//!
//! The in-memory, ordered side of a column family as the read path sees
//! it: a lock-free skiplist of cells plus the snapshot scanner the store
//! scanner merges with file sources. Write-side concerns (WAL, flush
//! scheduling) live elsewhere; a segment only needs to accept inserts and
//! produce ordered, read-point-aware cursors.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_skiplist::SkipSet;

use kiri_core::{Cell, CellComparator, Result};

use crate::scan::ScanSpec;
use crate::scanner::SourceScanner;

/// Skiplist key: store-comparator order, then sequence descending so the
/// newest write of an identical coordinate surfaces first.
#[derive(Clone)]
struct SegmentKey(Cell);

impl PartialEq for SegmentKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SegmentKey {}

impl PartialOrd for SegmentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        CellComparator
            .compare(&self.0, &other.0)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// An ordered, concurrently writable segment of the memstore.
pub struct MemStoreSegment {
    cells: SkipSet<SegmentKey>,
    min_ts: AtomicU64,
    max_ts: AtomicU64,
    data_size: AtomicUsize,
}

impl MemStoreSegment {
    pub fn new() -> Self {
        Self {
            cells: SkipSet::new(),
            min_ts: AtomicU64::new(u64::MAX),
            max_ts: AtomicU64::new(0),
            data_size: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, cell: Cell) {
        self.min_ts
            .fetch_min(cell.timestamp, AtomicOrdering::Relaxed);
        self.max_ts
            .fetch_max(cell.timestamp, AtomicOrdering::Relaxed);
        self.data_size
            .fetch_add(cell.serialized_size(), AtomicOrdering::Relaxed);
        self.cells.insert(SegmentKey(cell));
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn data_size(&self) -> usize {
        self.data_size.load(AtomicOrdering::Relaxed)
    }

    pub fn min_timestamp(&self) -> u64 {
        self.min_ts.load(AtomicOrdering::Relaxed)
    }

    pub fn max_timestamp(&self) -> u64 {
        self.max_ts.load(AtomicOrdering::Relaxed)
    }

    /// Open a cursor over this segment. Cells written after `read_point`
    /// are invisible to it. `order` ranks the scanner among its merge
    /// siblings; newer sources get higher values.
    pub fn scanner(self: &Arc<Self>, read_point: u64, order: u64) -> MemStoreScanner {
        MemStoreScanner {
            segment: Arc::clone(self),
            read_point,
            order,
            current: None,
            closed: false,
        }
    }
}

/// Cursor over one memstore segment.
pub struct MemStoreScanner {
    segment: Arc<MemStoreSegment>,
    read_point: u64,
    order: u64,
    current: Option<Cell>,
    closed: bool,
}

impl MemStoreScanner {
    /// First read-point-visible cell at or after `bound`.
    fn first_visible_from(&self, bound: Bound<&SegmentKey>) -> Option<Cell> {
        let mut entry = self.segment.cells.lower_bound(bound)?;
        loop {
            let key = entry.value();
            if key.0.sequence <= self.read_point {
                return Some(key.0.clone());
            }
            entry = entry.next()?;
        }
    }
}

impl SourceScanner for MemStoreScanner {
    fn peek(&self) -> Option<&Cell> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(current) = self.current.take() {
            self.current = self.first_visible_from(Bound::Excluded(&SegmentKey(current)));
        }
        Ok(())
    }

    fn seek(&mut self, key: &Cell) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.current = self.first_visible_from(Bound::Included(&SegmentKey(key.clone())));
        Ok(self.current.is_some())
    }

    fn reseek(&mut self, key: &Cell) -> Result<bool> {
        // Skiplist lookups are already O(log n) from the top; a reseek is
        // no cheaper than a seek here.
        self.seek(key)
    }

    fn order(&self) -> u64 {
        self.order
    }

    fn should_use(&self, scan: &ScanSpec, ttl_cutoff: Option<u64>) -> bool {
        if self.segment.is_empty() {
            return false;
        }
        let min = self.segment.min_timestamp();
        let max = self.segment.max_timestamp();
        scan.time_range.overlaps(min, max) && ttl_cutoff.map_or(true, |cutoff| max >= cutoff)
    }

    fn close(&mut self) {
        self.current = None;
        self.closed = true;
    }
}
