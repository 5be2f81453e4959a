//! # Scan Specification
//!
//! The immutable per-request description of a scan plus the per-family
//! read policy (`ScanInfo`). A `ScanSpec` is built once by the caller and
//! handed to the scanner; the scanner never mutates it apart from taking
//! ownership of the filter.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;

/// How file sources should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadType {
    /// Start with positional reads, switch to streaming once the scan has
    /// read enough bytes.
    #[default]
    Default,
    /// Positional reads only.
    Pread,
    /// Streaming reads from the start.
    Stream,
}

/// Half-open timestamp range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: u64,
    pub max: u64,
}

impl TimeRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn all_time() -> Self {
        Self {
            min: 0,
            max: u64::MAX,
        }
    }

    pub fn is_all_time(&self) -> bool {
        self.min == 0 && self.max == u64::MAX
    }

    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.min && ts < self.max
    }

    /// Whether `[min_ts, max_ts]` (inclusive) intersects this range.
    pub fn overlaps(&self, min_ts: u64, max_ts: u64) -> bool {
        min_ts < self.max && max_ts >= self.min
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all_time()
    }
}

/// Per-request scan description.
///
/// Fields are public in the manner of a config struct; convenience
/// constructors cover the common shapes.
#[derive(Default)]
pub struct ScanSpec {
    /// Inclusive (unless `include_start_row` is false) first row.
    pub start_row: Bytes,
    pub include_start_row: bool,
    /// Upper row bound; `None` scans to the end of the store.
    pub stop_row: Option<Bytes>,
    pub include_stop_row: bool,
    /// Restrict the scan to these qualifiers; `None` means every column.
    pub columns: Option<BTreeSet<Bytes>>,
    pub filter: Option<Box<dyn Filter>>,
    pub time_range: TimeRange,
    /// Versions to return per column.
    pub max_versions: u32,
    /// Max cells emitted per row, -1 for unlimited.
    pub store_limit: i64,
    /// Matching cells to skip at the start of each row.
    pub store_offset: u64,
    /// Expose delete markers instead of applying them.
    pub raw: bool,
    pub read_type: ReadType,
    pub cache_blocks: bool,
    /// Single-row fast path.
    pub get: bool,
    /// Restrict the scan to memstore sources.
    pub memory_only: bool,
    /// Restrict the scan to file sources.
    pub files_only: bool,
}

impl ScanSpec {
    pub fn new() -> Self {
        Self {
            include_start_row: true,
            max_versions: 1,
            store_limit: -1,
            cache_blocks: true,
            ..Default::default()
        }
    }

    /// Scan the row range `[start, stop)`.
    pub fn range(start: impl Into<Bytes>, stop: impl Into<Bytes>) -> Self {
        Self {
            start_row: start.into(),
            stop_row: Some(stop.into()),
            ..Self::new()
        }
    }

    /// Single-row lookup.
    pub fn single_row(row: impl Into<Bytes>) -> Self {
        let row = row.into();
        Self {
            start_row: row.clone(),
            stop_row: Some(row),
            include_stop_row: true,
            get: true,
            read_type: ReadType::Pread,
            ..Self::new()
        }
    }

    pub fn with_columns<I>(mut self, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_versions(mut self, versions: u32) -> Self {
        self.max_versions = versions;
        self
    }

    pub fn with_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_store_limit(mut self, limit: i64, offset: u64) -> Self {
        self.store_limit = limit;
        self.store_offset = offset;
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_read_type(mut self, read_type: ReadType) -> Self {
        self.read_type = read_type;
        self
    }

    /// Number of explicitly requested columns.
    pub fn num_columns(&self) -> usize {
        self.columns.as_ref().map_or(0, BTreeSet::len)
    }

    /// Whether the scan has explicit row bounds.
    pub fn has_row_bounds(&self) -> bool {
        !self.start_row.is_empty() || self.stop_row.is_some()
    }
}

/// Per-column-family read policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanInfo {
    /// Time-to-live in milliseconds; `u64::MAX` keeps cells forever.
    pub ttl_ms: u64,
    /// Versions to retain even past their TTL.
    pub min_versions: u32,
    /// A single row larger than this fails the scan.
    pub max_row_size: u64,
    /// Cells scanned between wall-clock limit checks.
    pub cells_per_heartbeat_check: u64,
    /// Bytes read before a DEFAULT-read-type scan switches from positional
    /// to streaming reads.
    pub pread_max_bytes: u64,
    /// Seek file sources concurrently when more than one is present.
    pub parallel_seek_enabled: bool,
}

pub const DEFAULT_CELLS_PER_HEARTBEAT_CHECK: u64 = 10_000;
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

impl Default for ScanInfo {
    fn default() -> Self {
        Self {
            ttl_ms: u64::MAX,
            min_versions: 0,
            max_row_size: 1024 * 1024 * 1024, // 1GB
            cells_per_heartbeat_check: DEFAULT_CELLS_PER_HEARTBEAT_CHECK,
            pread_max_bytes: 4 * DEFAULT_BLOCK_SIZE,
            parallel_seek_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(10, 20);
        assert!(!range.contains(9));
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
    }

    #[test]
    fn test_time_range_overlaps() {
        let range = TimeRange::new(10, 20);
        assert!(range.overlaps(0, 10));
        assert!(range.overlaps(19, 100));
        assert!(!range.overlaps(20, 100));
        assert!(!range.overlaps(0, 9));
    }

    #[test]
    fn test_single_row_spec() {
        let spec = ScanSpec::single_row(&b"r1"[..]);
        assert!(spec.get);
        assert!(spec.include_stop_row);
        assert_eq!(spec.read_type, ReadType::Pread);
    }
}
