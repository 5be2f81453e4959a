//! # Match Policies
//!
//! Per-cell classification driving the scanner loop. A policy is re-armed
//! once per row (`set_to_new_row`) and then asked to classify every cell
//! the merge heap surfaces for that row. The three concrete policies sit
//! behind one closed enum rather than a trait object; the set is fixed.

mod columns;
mod deletes;

use std::cmp::Ordering;

use bytes::Bytes;

use kiri_core::{Cell, CellComparator, Error, Result};

use crate::filter::{Filter, FilterDecision};
use crate::scan::{ScanInfo, ScanSpec, TimeRange};

use columns::{ColumnCheck, ColumnTracker};
use deletes::{DeleteResult, DeleteTracker};

/// What the scanner should do with the cell it just peeked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCode {
    Include,
    IncludeAndSeekNextCol,
    IncludeAndSeekNextRow,
    Skip,
    SeekNextCol,
    SeekNextRow,
    /// Seek to the filter-provided hint.
    SeekUsingHint,
    /// The current row is complete.
    Done,
    /// No later cell can match; the scan is over.
    DoneScan,
}

/// The match policy of a scan: one of three concrete classifiers.
pub enum ScanPolicy {
    User(UserScanPolicy),
    Compaction(CompactionPolicy),
    Legacy(LegacyCompactionPolicy),
}

impl ScanPolicy {
    /// Policy for a user-facing scan. Takes ownership of the scan's
    /// filter. Rejects raw scans with explicit columns.
    pub fn user(scan: &mut ScanSpec, info: &ScanInfo, oldest_unexpired_ts: u64) -> Result<Self> {
        if scan.raw && scan.columns.is_some() {
            return Err(Error::invalid_scan("cannot specify any column for a raw scan"));
        }
        Ok(ScanPolicy::User(UserScanPolicy::new(
            scan,
            info,
            oldest_unexpired_ts,
        )))
    }

    /// Policy for a compaction scan. Falls back to the legacy classifier
    /// when the scan carries a filter, row bounds, explicit columns or a
    /// bounded time range; the plain compaction classifier ignores the
    /// scan object entirely.
    pub fn compaction(
        scan: &mut ScanSpec,
        info: &ScanInfo,
        smallest_read_point: u64,
        oldest_unexpired_ts: u64,
        drop_deletes: Option<(Bytes, Bytes)>,
    ) -> Self {
        let needs_legacy = scan.filter.is_some()
            || scan.has_row_bounds()
            || scan.columns.is_some()
            || !scan.time_range.is_all_time();
        let base = CompactionPolicy::new(info, smallest_read_point, oldest_unexpired_ts, drop_deletes);
        if needs_legacy {
            ScanPolicy::Legacy(LegacyCompactionPolicy::new(base, scan))
        } else {
            ScanPolicy::Compaction(base)
        }
    }

    pub fn match_cell(&mut self, cell: &Cell) -> MatchCode {
        match self {
            ScanPolicy::User(p) => p.match_cell(cell),
            ScanPolicy::Compaction(p) => p.match_cell(cell),
            ScanPolicy::Legacy(p) => p.match_cell(cell),
        }
    }

    pub fn set_to_new_row(&mut self, cell: &Cell) {
        match self {
            ScanPolicy::User(p) => p.set_to_new_row(cell),
            ScanPolicy::Compaction(p) => p.set_to_new_row(cell),
            ScanPolicy::Legacy(p) => p.set_to_new_row(cell),
        }
    }

    pub fn clear_current_row(&mut self) {
        match self {
            ScanPolicy::User(p) => p.current_row = None,
            ScanPolicy::Compaction(p) => p.current_row = None,
            ScanPolicy::Legacy(p) => p.base.current_row = None,
        }
    }

    pub fn current_row(&self) -> Option<&Bytes> {
        match self {
            ScanPolicy::User(p) => p.current_row.as_ref(),
            ScanPolicy::Compaction(p) => p.current_row.as_ref(),
            ScanPolicy::Legacy(p) => p.base.current_row.as_ref(),
        }
    }

    /// Key addressing the position just past the cell's column.
    pub fn key_for_next_column(&self, cell: &Cell) -> Cell {
        match self {
            ScanPolicy::User(p) => p.columns.key_for_next_column(cell),
            ScanPolicy::Compaction(_) => {
                Cell::last_on_row_col(cell.row.clone(), cell.qualifier.clone())
            }
            ScanPolicy::Legacy(p) => p.columns.key_for_next_column(cell),
        }
    }

    /// The filter's seek hint, if any.
    pub fn next_key_hint(&self, cell: &Cell) -> Option<Cell> {
        match self {
            ScanPolicy::User(p) => p.filter.as_ref().and_then(|f| f.next_key_hint(cell)),
            ScanPolicy::Compaction(_) => None,
            ScanPolicy::Legacy(p) => p.filter.as_ref().and_then(|f| f.next_key_hint(cell)),
        }
    }

    /// Compare an indexed key with the artificial last-possible-key of the
    /// cell's row. `Greater`/`Equal` means the next block starts at or
    /// past the row boundary.
    pub fn compare_key_for_next_row(&self, indexed_key: &Cell, cell: &Cell) -> Ordering {
        CellComparator.compare(indexed_key, &Cell::last_on_row(cell.row.clone()))
    }

    /// Same, for the boundary of the cell's column.
    pub fn compare_key_for_next_column(&self, indexed_key: &Cell, cell: &Cell) -> Ordering {
        CellComparator.compare(
            indexed_key,
            &Cell::last_on_row_col(cell.row.clone(), cell.qualifier.clone()),
        )
    }

    /// Can any row after the cell's row still fall inside the scan range?
    pub fn more_rows_may_exist_after(&self, cell: &Cell) -> bool {
        match self {
            ScanPolicy::User(p) => match &p.stop_row {
                None => true,
                Some(stop) => cell.row < *stop,
            },
            ScanPolicy::Compaction(_) => true,
            ScanPolicy::Legacy(p) => match &p.stop_row {
                None => true,
                Some(stop) => cell.row < *stop,
            },
        }
    }

    /// Release scanner-backed references before the caller's `shipped()`
    /// completes.
    pub fn before_shipped(&mut self) {
        match self {
            ScanPolicy::User(p) => {
                if let Some(row) = &p.current_row {
                    p.current_row = Some(Bytes::copy_from_slice(row));
                }
                p.columns.before_shipped();
                p.deletes.before_shipped();
            }
            ScanPolicy::Compaction(p) => {
                if let Some(row) = &p.current_row {
                    p.current_row = Some(Bytes::copy_from_slice(row));
                }
            }
            ScanPolicy::Legacy(p) => {
                if let Some(row) = &p.base.current_row {
                    p.base.current_row = Some(Bytes::copy_from_slice(row));
                }
                p.columns.before_shipped();
                p.deletes.before_shipped();
            }
        }
    }

    /// Synthetic first-seek key derived from the scan's start row.
    pub fn start_key(&self) -> &Cell {
        match self {
            ScanPolicy::User(p) => &p.start_key,
            ScanPolicy::Compaction(p) => &p.start_key,
            ScanPolicy::Legacy(p) => &p.base.start_key,
        }
    }

    pub fn is_user_scan(&self) -> bool {
        matches!(self, ScanPolicy::User(_))
    }

    /// Apply the filter's transform to a cell about to be emitted.
    pub fn transform_cell(&self, cell: &Cell) -> Cell {
        let filter = match self {
            ScanPolicy::User(p) => p.filter.as_ref(),
            ScanPolicy::Compaction(_) => None,
            ScanPolicy::Legacy(p) => p.filter.as_ref(),
        };
        match filter {
            Some(f) => f.transform_cell(cell),
            None => cell.clone(),
        }
    }
}

/// Classifier for user-facing scans: time range, column set, filter,
/// version limits, TTL and delete visibility.
pub struct UserScanPolicy {
    current_row: Option<Bytes>,
    row_beyond_stop: bool,
    stop_row: Option<Bytes>,
    include_stop_row: bool,
    start_key: Cell,
    columns: ColumnTracker,
    deletes: DeleteTracker,
    filter: Option<Box<dyn Filter>>,
    time_range: TimeRange,
    min_versions: u32,
    oldest_unexpired_ts: u64,
    raw: bool,
}

impl UserScanPolicy {
    fn new(scan: &mut ScanSpec, info: &ScanInfo, oldest_unexpired_ts: u64) -> Self {
        let start_key = if scan.include_start_row {
            Cell::first_on_row(scan.start_row.clone())
        } else {
            Cell::last_on_row(scan.start_row.clone())
        };
        Self {
            current_row: None,
            row_beyond_stop: false,
            stop_row: scan.stop_row.clone(),
            include_stop_row: scan.include_stop_row,
            start_key,
            columns: ColumnTracker::new(scan.columns.as_ref(), scan.max_versions),
            deletes: DeleteTracker::default(),
            filter: scan.filter.take(),
            time_range: scan.time_range,
            min_versions: info.min_versions,
            oldest_unexpired_ts,
            raw: scan.raw,
        }
    }

    fn set_to_new_row(&mut self, cell: &Cell) {
        self.current_row = Some(cell.row.clone());
        self.columns.reset();
        self.deletes.reset();
        if let Some(filter) = &mut self.filter {
            filter.reset();
        }
        self.row_beyond_stop = match &self.stop_row {
            None => false,
            Some(stop) => match cell.row.cmp(stop) {
                Ordering::Less => false,
                Ordering::Equal => !self.include_stop_row,
                Ordering::Greater => true,
            },
        };
    }

    fn match_cell(&mut self, cell: &Cell) -> MatchCode {
        // An unarmed policy (row just completed via a seek directive) and
        // a cell from a later row both mean the same thing: this row is
        // finished, the caller re-arms on its next call.
        let Some(current_row) = &self.current_row else {
            return MatchCode::Done;
        };
        if cell.row != *current_row {
            debug_assert!(cell.row > *current_row, "heap went backwards");
            return MatchCode::Done;
        }
        if self.row_beyond_stop {
            return MatchCode::DoneScan;
        }
        if let Some(filter) = &self.filter {
            if filter.filter_all_remaining() {
                return MatchCode::DoneScan;
            }
        }
        if self.columns.done() {
            return MatchCode::SeekNextRow;
        }

        let ts = cell.timestamp;
        if ts >= self.time_range.max {
            // Too new; older versions of the same column follow.
            return MatchCode::Skip;
        }

        if cell.kind.is_delete() {
            if !self.raw {
                self.deletes.add(cell);
                return MatchCode::Skip;
            }
            // Raw scans surface the marker like any other cell.
        } else if !self.raw {
            match self.deletes.is_deleted(cell) {
                DeleteResult::FamilyDeleted | DeleteResult::ColumnDeleted => {
                    return self.columns.next_row_or_next_col(cell);
                }
                DeleteResult::VersionDeleted => return MatchCode::Skip,
                DeleteResult::NotDeleted => {}
            }
        }

        if ts < self.time_range.min {
            return self.columns.next_row_or_next_col(cell);
        }

        match self.columns.check_column(cell) {
            ColumnCheck::Wanted => {}
            ColumnCheck::SeekNextCol => return MatchCode::SeekNextCol,
            ColumnCheck::SeekNextRow => return MatchCode::SeekNextRow,
        }

        // TTL: expired versions are only retained up to min_versions.
        if ts < self.oldest_unexpired_ts && self.columns.current_count() >= self.min_versions {
            return self.columns.next_row_or_next_col(cell);
        }

        let mut seek_after_include = None;
        if let Some(filter) = &mut self.filter {
            match filter.filter_cell(cell) {
                FilterDecision::Include => {}
                FilterDecision::IncludeAndNextCol => {
                    seek_after_include = Some(MatchCode::IncludeAndSeekNextCol);
                }
                FilterDecision::IncludeAndNextRow => {
                    seek_after_include = Some(MatchCode::IncludeAndSeekNextRow);
                }
                FilterDecision::Skip => return MatchCode::Skip,
                FilterDecision::NextCol => return self.columns.next_row_or_next_col(cell),
                FilterDecision::NextRow => return MatchCode::SeekNextRow,
                FilterDecision::SeekUsingHint => return MatchCode::SeekUsingHint,
                FilterDecision::AllDone => return MatchCode::DoneScan,
            }
        }

        merge_include(self.columns.check_versions(cell), seek_after_include)
    }
}

/// The filter may demand a stronger seek than version counting produced.
fn merge_include(code: MatchCode, filter_directive: Option<MatchCode>) -> MatchCode {
    match (code, filter_directive) {
        (_, Some(MatchCode::IncludeAndSeekNextRow)) => MatchCode::IncludeAndSeekNextRow,
        (MatchCode::IncludeAndSeekNextRow, _) => MatchCode::IncludeAndSeekNextRow,
        (_, Some(MatchCode::IncludeAndSeekNextCol)) => MatchCode::IncludeAndSeekNextCol,
        (code, _) => code,
    }
}

/// Classifier for compaction scans: keeps everything a still-live reader
/// could need, drops expired garbage, and optionally drops delete markers
/// inside a row range once no open scanner can observe them.
pub struct CompactionPolicy {
    current_row: Option<Bytes>,
    start_key: Cell,
    smallest_read_point: u64,
    oldest_unexpired_ts: u64,
    min_versions: u32,
    drop_deletes: Option<(Bytes, Bytes)>,
}

impl CompactionPolicy {
    fn new(
        info: &ScanInfo,
        smallest_read_point: u64,
        oldest_unexpired_ts: u64,
        drop_deletes: Option<(Bytes, Bytes)>,
    ) -> Self {
        Self {
            current_row: None,
            start_key: Cell::first_on_row(Bytes::new()),
            smallest_read_point,
            oldest_unexpired_ts,
            min_versions: info.min_versions,
            drop_deletes,
        }
    }

    fn set_to_new_row(&mut self, cell: &Cell) {
        self.current_row = Some(cell.row.clone());
    }

    fn match_cell(&mut self, cell: &Cell) -> MatchCode {
        let Some(current_row) = &self.current_row else {
            return MatchCode::Done;
        };
        if cell.row != *current_row {
            return MatchCode::Done;
        }
        if cell.kind.is_delete() {
            return if self.should_drop_delete(cell) {
                MatchCode::Skip
            } else {
                MatchCode::Include
            };
        }
        if self.min_versions == 0 && cell.timestamp < self.oldest_unexpired_ts {
            return MatchCode::Skip;
        }
        MatchCode::Include
    }

    /// A delete marker can be dropped once its row is inside the drop
    /// range and every open scanner's read point is past its write.
    fn should_drop_delete(&self, cell: &Cell) -> bool {
        let Some((from, to)) = &self.drop_deletes else {
            return false;
        };
        if cell.sequence > self.smallest_read_point {
            return false;
        }
        let past_from = from.is_empty() || cell.row >= *from;
        let before_to = to.is_empty() || cell.row < *to;
        past_from && before_to
    }
}

/// Compatibility classifier for compaction scans that carry a scan spec:
/// a filter, explicit row bounds, explicit columns or a bounded time
/// range. Combines the compaction retention rules with the scan-shaped
/// checks the plain classifier ignores.
pub struct LegacyCompactionPolicy {
    base: CompactionPolicy,
    stop_row: Option<Bytes>,
    include_stop_row: bool,
    row_beyond_stop: bool,
    time_range: TimeRange,
    columns: ColumnTracker,
    deletes: DeleteTracker,
    filter: Option<Box<dyn Filter>>,
}

impl LegacyCompactionPolicy {
    fn new(mut base: CompactionPolicy, scan: &mut ScanSpec) -> Self {
        base.start_key = if scan.include_start_row {
            Cell::first_on_row(scan.start_row.clone())
        } else {
            Cell::last_on_row(scan.start_row.clone())
        };
        Self {
            base,
            stop_row: scan.stop_row.clone(),
            include_stop_row: scan.include_stop_row,
            row_beyond_stop: false,
            time_range: scan.time_range,
            columns: ColumnTracker::new(scan.columns.as_ref(), scan.max_versions),
            deletes: DeleteTracker::default(),
            filter: scan.filter.take(),
        }
    }

    fn set_to_new_row(&mut self, cell: &Cell) {
        self.base.set_to_new_row(cell);
        self.columns.reset();
        self.deletes.reset();
        if let Some(filter) = &mut self.filter {
            filter.reset();
        }
        self.row_beyond_stop = match &self.stop_row {
            None => false,
            Some(stop) => match cell.row.cmp(stop) {
                Ordering::Less => false,
                Ordering::Equal => !self.include_stop_row,
                Ordering::Greater => true,
            },
        };
    }

    fn match_cell(&mut self, cell: &Cell) -> MatchCode {
        let Some(current_row) = &self.base.current_row else {
            return MatchCode::Done;
        };
        if cell.row != *current_row {
            return MatchCode::Done;
        }
        if self.row_beyond_stop {
            return MatchCode::DoneScan;
        }
        let ts = cell.timestamp;
        if ts >= self.time_range.max {
            return MatchCode::Skip;
        }
        if cell.kind.is_delete() {
            self.deletes.add(cell);
            return if self.base.should_drop_delete(cell) {
                MatchCode::Skip
            } else {
                MatchCode::Include
            };
        }
        match self.deletes.is_deleted(cell) {
            DeleteResult::FamilyDeleted | DeleteResult::ColumnDeleted => {
                return self.columns.next_row_or_next_col(cell);
            }
            DeleteResult::VersionDeleted => return MatchCode::Skip,
            DeleteResult::NotDeleted => {}
        }
        if ts < self.time_range.min {
            return self.columns.next_row_or_next_col(cell);
        }
        if self.base.min_versions == 0 && ts < self.base.oldest_unexpired_ts {
            return MatchCode::Skip;
        }
        match self.columns.check_column(cell) {
            ColumnCheck::Wanted => {}
            ColumnCheck::SeekNextCol => return MatchCode::SeekNextCol,
            ColumnCheck::SeekNextRow => return MatchCode::SeekNextRow,
        }
        if let Some(filter) = &mut self.filter {
            match filter.filter_cell(cell) {
                FilterDecision::Include
                | FilterDecision::IncludeAndNextCol
                | FilterDecision::IncludeAndNextRow => {}
                FilterDecision::Skip => return MatchCode::Skip,
                FilterDecision::NextCol => return self.columns.next_row_or_next_col(cell),
                FilterDecision::NextRow => return MatchCode::SeekNextRow,
                FilterDecision::SeekUsingHint => return MatchCode::SeekUsingHint,
                FilterDecision::AllDone => return MatchCode::DoneScan,
            }
        }
        self.columns.check_versions(cell)
    }
}
