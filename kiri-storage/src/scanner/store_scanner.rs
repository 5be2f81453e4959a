//! # Store Scanner
//!
//! The merged, per-row, version-aware cursor over one column family:
//! memstore segments plus every live store file, seen through a single
//! non-decreasing cell stream. Each `next` call peeks the merge heap,
//! asks the match policy what to do with the cell, and either emits it,
//! skips it, or seeks past whole columns and rows, preferring cheap
//! in-block skips over block-fetching seeks when the sparse index says
//! the target is nearby.
//!
//! Concurrent flushes are absorbed lazily: the flush thread only fills a
//! lock-protected pending list, and the reader re-seats itself on its own
//! next call. Long DEFAULT-read-type scans switch their file sources from
//! positional to streaming reads at `shipped()` boundaries.
//!
//! Not thread safe: one reader drives `next`/`seek`/`shipped`/`close`;
//! only `update_readers` may be called concurrently, from the flush
//! thread.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use kiri_core::util::now_millis;
use kiri_core::{Cell, CellComparator, Error, Metrics, Result};

use crate::scan::{ReadType, ScanInfo, ScanSpec};
use crate::scanner::heap::MergeHeap;
use crate::scanner::matcher::{MatchCode, ScanPolicy};
use crate::scanner::progress::{LimitScope, NextState, ScanProgress};
use crate::scanner::select::select_scanners;
use crate::scanner::SourceScanner;
use crate::store::{FileHandle, FlushSignal, StoreView};

/// Process-global lazy-seek switch. Exists so tests can prove that lazy
/// seeks actually save seek operations; always on otherwise.
static LAZY_SEEK_ENABLED: AtomicBool = AtomicBool::new(true);

fn lazy_seek_enabled() -> bool {
    LAZY_SEEK_ENABLED.load(AtomicOrdering::Relaxed)
}

#[doc(hidden)]
pub fn set_lazy_seek_enabled(enabled: bool) {
    LAZY_SEEK_ENABLED.store(enabled, AtomicOrdering::Relaxed);
}

/// Merged scanner over one column family's memstore and files.
pub struct StoreScanner {
    store: Option<Arc<dyn StoreView>>,
    scan: ScanSpec,
    policy: ScanPolicy,
    heap: Option<MergeHeap>,
    comparator: CellComparator,

    flush_signal: Arc<FlushSignal>,
    /// Sources that ran dry or were replaced while cells referencing their
    /// buffers may still be en route to the caller. Closed at `shipped()`.
    delayed_close: Vec<Box<dyn SourceScanner>>,
    /// A drained heap parked for the same reason.
    parked_heap: Option<MergeHeap>,
    closing: bool,

    read_point: u64,
    is_get: bool,
    explicit_column_query: bool,
    use_row_col_bloom: bool,
    parallel_seek_pool: Option<Arc<rayon::ThreadPool>>,

    store_limit: i64,
    store_offset: u64,
    count_per_row: u64,

    oldest_unexpired_ts: u64,
    min_versions: u32,
    max_row_size: u64,
    cells_per_heartbeat_check: u64,

    read_type: ReadType,
    scan_use_pread: bool,
    pread_max_bytes: u64,
    bytes_read: u64,

    /// Cells seen by the scanner, including skipped ones but not those
    /// jumped over by seeking.
    cells_scanned: u64,
    prev_cell: Option<Cell>,

    metrics: Metrics,
}

impl StoreScanner {
    /// Open a user scan across the store's current memstore and files.
    /// Registers as a flush observer; on failure the registration is
    /// rolled back before the error propagates.
    pub fn user_scan(
        store: Arc<dyn StoreView>,
        mut scan: ScanSpec,
        scan_info: ScanInfo,
        read_point: u64,
        metrics: Metrics,
    ) -> Result<Self> {
        let now = now_millis();
        let oldest_unexpired_ts = if scan.raw {
            0
        } else {
            now.saturating_sub(scan_info.ttl_ms)
        };
        let policy = ScanPolicy::user(&mut scan, &scan_info, oldest_unexpired_ts)?;
        let mut scanner = Self::assemble(
            Some(Arc::clone(&store)),
            scan,
            &scan_info,
            read_point,
            policy,
            oldest_unexpired_ts,
            metrics,
        );
        store.add_changed_reader_observer(Arc::downgrade(&scanner.flush_signal));
        match scanner.open_initial_scanners(&store) {
            Ok(()) => Ok(scanner),
            Err(e) => {
                // Without this the store would keep a dead observer slot.
                store.delete_changed_reader_observer(&scanner.flush_signal);
                Err(e)
            }
        }
    }

    /// Open a compaction scan over the supplied sources. No lazy or
    /// parallel seeking, no flush observation: compactions keep reading
    /// the files they started with.
    pub fn compaction_scan(
        store: Option<Arc<dyn StoreView>>,
        mut scan: ScanSpec,
        scan_info: ScanInfo,
        sources: Vec<Box<dyn SourceScanner>>,
        smallest_read_point: u64,
        drop_deletes: Option<(Bytes, Bytes)>,
        read_point: u64,
        metrics: Metrics,
    ) -> Result<Self> {
        let now = now_millis();
        let oldest_unexpired_ts = now.saturating_sub(scan_info.ttl_ms);
        let policy = ScanPolicy::compaction(
            &mut scan,
            &scan_info,
            smallest_read_point,
            oldest_unexpired_ts,
            drop_deletes,
        );
        let mut scanner = Self::assemble(
            store,
            scan,
            &scan_info,
            read_point,
            policy,
            oldest_unexpired_ts,
            metrics,
        );
        let mut sources = select_scanners(sources, &scanner.scan, scanner.ttl_cutoff());
        let start_key = scanner.policy.start_key().clone();
        scanner.seek_scanners(&mut sources, &start_key, false, false)?;
        scanner.heap = Some(MergeHeap::new(sources, scanner.comparator));
        Ok(scanner)
    }

    /// Open a user scan over the supplied sources without a backing store.
    /// Used by tests and tooling that assemble their own source set.
    pub fn user_scan_with_sources(
        mut scan: ScanSpec,
        scan_info: ScanInfo,
        sources: Vec<Box<dyn SourceScanner>>,
        read_point: u64,
    ) -> Result<Self> {
        let now = now_millis();
        let oldest_unexpired_ts = if scan.raw {
            0
        } else {
            now.saturating_sub(scan_info.ttl_ms)
        };
        let policy = ScanPolicy::user(&mut scan, &scan_info, oldest_unexpired_ts)?;
        let mut scanner = Self::assemble(
            None,
            scan,
            &scan_info,
            read_point,
            policy,
            oldest_unexpired_ts,
            Metrics::new(),
        );
        let mut sources = select_scanners(sources, &scanner.scan, scanner.ttl_cutoff());
        let lazy = scanner.explicit_column_query && lazy_seek_enabled();
        let start_key = scanner.policy.start_key().clone();
        scanner.seek_scanners(&mut sources, &start_key, lazy, false)?;
        scanner.heap = Some(MergeHeap::new(sources, scanner.comparator));
        Ok(scanner)
    }

    fn assemble(
        store: Option<Arc<dyn StoreView>>,
        scan: ScanSpec,
        scan_info: &ScanInfo,
        read_point: u64,
        policy: ScanPolicy,
        oldest_unexpired_ts: u64,
        metrics: Metrics,
    ) -> Self {
        let is_get = scan.get;
        let num_col = scan.num_columns();
        // Row-col bloom filters also help multi-row scans over a single
        // column; plain row blooms cannot answer those.
        let use_row_col_bloom = num_col > 1 || (!is_get && num_col == 1);
        let (read_type, scan_use_pread) = if is_get {
            (ReadType::Pread, true)
        } else {
            (scan.read_type, scan.read_type != ReadType::Stream)
        };
        let parallel_seek_pool = match &store {
            Some(store) if scan_info.parallel_seek_enabled && store.storefiles_count() > 1 => {
                store.seek_pool()
            }
            _ => None,
        };
        let comparator = store
            .as_ref()
            .map(|s| s.comparator())
            .unwrap_or_default();
        Self {
            store,
            store_limit: scan.store_limit,
            store_offset: scan.store_offset,
            explicit_column_query: num_col > 0,
            scan,
            policy,
            heap: None,
            comparator,
            flush_signal: Arc::new(FlushSignal::new()),
            delayed_close: Vec::new(),
            parked_heap: None,
            closing: false,
            read_point,
            is_get,
            use_row_col_bloom,
            parallel_seek_pool,
            count_per_row: 0,
            oldest_unexpired_ts,
            min_versions: scan_info.min_versions,
            max_row_size: scan_info.max_row_size,
            cells_per_heartbeat_check: scan_info.cells_per_heartbeat_check.max(1),
            read_type,
            scan_use_pread,
            pread_max_bytes: scan_info.pread_max_bytes,
            bytes_read: 0,
            cells_scanned: 0,
            prev_cell: None,
            metrics,
        }
    }

    fn open_initial_scanners(&mut self, store: &Arc<dyn StoreView>) -> Result<()> {
        let candidates = store.scanners(&self.scan, self.scan_use_pread, false, self.read_point)?;
        let mut scanners = select_scanners(candidates, &self.scan, self.ttl_cutoff());
        let lazy = self.explicit_column_query && lazy_seek_enabled();
        let parallel = self.parallel_seek_pool.is_some();
        let start_key = self.policy.start_key().clone();
        self.seek_scanners(&mut scanners, &start_key, lazy, parallel)?;
        self.heap = Some(MergeHeap::new(scanners, self.comparator));
        Ok(())
    }

    /// Files wholly expired by TTL can be skipped, but only when no
    /// min-versions retention could force expired cells back out.
    fn ttl_cutoff(&self) -> Option<u64> {
        (self.min_versions == 0).then_some(self.oldest_unexpired_ts)
    }

    /// Position a fresh set of sources at `key`.
    fn seek_scanners(
        &self,
        scanners: &mut Vec<Box<dyn SourceScanner>>,
        key: &Cell,
        lazy: bool,
        parallel: bool,
    ) -> Result<()> {
        if lazy {
            for scanner in scanners.iter_mut() {
                scanner.request_seek(key, false, true)?;
                self.metrics.record_lazy_seek();
            }
            return Ok(());
        }
        if parallel {
            if let Some(pool) = &self.parallel_seek_pool {
                self.metrics.record_parallel_seek();
                return crate::scanner::parallel::parallel_seek(pool, scanners, key);
            }
        }
        let mut total_sought_bytes = 0u64;
        for scanner in scanners.iter_mut() {
            if self.policy.is_user_scan() && total_sought_bytes >= self.max_row_size {
                return Err(Error::RowTooBig {
                    max_row_size: self.max_row_size,
                });
            }
            scanner.seek(key)?;
            self.metrics.record_seek();
            if let Some(cell) = scanner.peek() {
                total_sought_bytes += cell.serialized_size() as u64;
            }
        }
        Ok(())
    }

    /// Current least cell, or `None` once the scan has drained.
    pub fn peek(&self) -> Option<&Cell> {
        self.heap.as_ref().and_then(MergeHeap::peek)
    }

    pub fn read_point(&self) -> u64 {
        self.read_point
    }

    /// Cells this scanner has looked at, including skipped ones but not
    /// those jumped over by seeks.
    pub fn estimated_cells_scanned(&self) -> u64 {
        self.cells_scanned
    }

    /// Handle for wiring this scanner into a store's observer table.
    pub fn flush_observer(&self) -> Arc<FlushSignal> {
        Arc::clone(&self.flush_signal)
    }

    /// Flush-thread entry point: publish new files and replacement
    /// memstore scanners. Applied lazily by the reader.
    pub fn update_readers(
        &self,
        files: Vec<FileHandle>,
        memstore_scanners: Vec<Box<dyn SourceScanner>>,
    ) {
        self.flush_signal.notify(files, memstore_scanners);
    }

    pub fn seek(&mut self, key: &Cell) -> Result<bool> {
        if self.check_flushed() {
            self.reopen_after_flush()?;
        }
        let result = match self.heap.as_mut() {
            Some(heap) => heap.seek(key),
            None => return Ok(false),
        };
        self.collect_exhausted();
        result
    }

    pub fn reseek(&mut self, key: &Cell) -> Result<bool> {
        if self.check_flushed() {
            self.reopen_after_flush()?;
        }
        let result = match self.heap.as_mut() {
            Some(heap) => {
                if self.explicit_column_query && lazy_seek_enabled() {
                    self.metrics.record_lazy_seek();
                    heap.request_seek(key, true, self.use_row_col_bloom)
                } else {
                    heap.reseek(key)
                }
            }
            None => return Ok(false),
        };
        self.collect_exhausted();
        result
    }

    /// Fill `out` with the next batch of cells, bounded by `progress`.
    /// Returns whether the scan has more values; the precise terminal
    /// state is recorded on `progress`.
    pub fn next(&mut self, out: &mut Vec<Cell>, progress: &mut ScanProgress) -> Result<bool> {
        let emitted_from = out.len();
        let result = self.next_inner(out, progress);
        let emitted = &out[emitted_from..];
        if !emitted.is_empty() {
            let bytes: u64 = emitted.iter().map(|c| c.serialized_size() as u64).sum();
            self.metrics.record_emission(emitted.len() as u64, bytes);
        }
        result
    }

    fn next_inner(&mut self, out: &mut Vec<Cell>, progress: &mut ScanProgress) -> Result<bool> {
        if self.check_flushed() && self.reopen_after_flush()? {
            // The view moved under us; yield so the caller sees fresh
            // state instead of a stale row.
            return Ok(progress.set_state(NextState::MoreValues));
        }
        if self.heap.is_none() {
            self.close_keeping_heap();
            return Ok(progress.set_state(NextState::NoMoreValues));
        }
        let Some(mut cell) = self.peek().cloned() else {
            self.close_keeping_heap();
            return Ok(progress.set_state(NextState::NoMoreValues));
        };

        // Without cell-scoped limits a call always starts on a fresh row;
        // with them it may be resuming mid-row and must not re-arm.
        if !progress.has_any_limit(LimitScope::BetweenCells) || self.policy.current_row().is_none()
        {
            self.count_per_row = 0;
            self.policy.set_to_new_row(&cell);
        }
        if !progress.keep_progress() {
            progress.clear_progress();
        }

        let mut count = 0u64;
        let mut total_bytes_read = 0u64;

        loop {
            if self.cells_scanned % self.cells_per_heartbeat_check == 0 {
                progress.update_time_progress();
                if progress.check_time_limit(LimitScope::BetweenCells) {
                    return Ok(progress.set_state(NextState::TimeLimitReached));
                }
            }
            if self.prev_cell.as_ref() != Some(&cell) {
                self.cells_scanned += 1;
            }
            self.check_scan_order(&cell);
            let cell_size = cell.serialized_size() as u64;
            self.bytes_read += cell_size;
            self.prev_cell = Some(cell.clone());

            match self.policy.match_cell(&cell) {
                code @ (MatchCode::Include
                | MatchCode::IncludeAndSeekNextCol
                | MatchCode::IncludeAndSeekNextRow) => {
                    self.count_per_row += 1;
                    // The per-row limit wins over whatever the policy would
                    // have said about later cells of this row.
                    if self.store_limit > -1
                        && self.count_per_row > self.store_limit as u64 + self.store_offset
                    {
                        if !self.policy.more_rows_may_exist_after(&cell) {
                            self.close_keeping_heap();
                            return Ok(progress.set_state(NextState::NoMoreValues));
                        }
                        self.policy.clear_current_row();
                        self.seek_to_next_row(&cell)?;
                        break;
                    }

                    if self.count_per_row > self.store_offset {
                        let emit = self.policy.transform_cell(&cell);
                        let emit_size = emit.serialized_size() as u64;
                        total_bytes_read += emit_size;
                        progress.increment_size_progress(emit_size, emit.heap_size() as u64);
                        progress.increment_batch_progress(1);
                        count += 1;
                        out.push(emit);

                        if self.policy.is_user_scan() && total_bytes_read > self.max_row_size {
                            return Err(Error::RowTooBig {
                                max_row_size: self.max_row_size,
                            });
                        }
                    }

                    match code {
                        MatchCode::IncludeAndSeekNextRow => {
                            if !self.policy.more_rows_may_exist_after(&cell) {
                                self.close_keeping_heap();
                                return Ok(progress.set_state(NextState::NoMoreValues));
                            }
                            self.policy.clear_current_row();
                            self.seek_or_skip_to_next_row(&cell)?;
                        }
                        MatchCode::IncludeAndSeekNextCol => {
                            self.seek_or_skip_to_next_column(&cell)?;
                        }
                        _ => self.heap_advance()?,
                    }

                    if progress.check_batch_limit(LimitScope::BetweenCells)
                        || progress.check_size_limit(LimitScope::BetweenCells)
                    {
                        break;
                    }
                }

                MatchCode::Done => {
                    // A get is one row; nothing further can match.
                    if self.is_get {
                        self.close_keeping_heap();
                        return Ok(progress.set_state(NextState::NoMoreValues));
                    }
                    self.policy.clear_current_row();
                    return Ok(progress.set_state(NextState::MoreValues));
                }

                MatchCode::DoneScan => {
                    self.close_keeping_heap();
                    return Ok(progress.set_state(NextState::NoMoreValues));
                }

                MatchCode::SeekNextRow => {
                    if !self.policy.more_rows_may_exist_after(&cell) {
                        self.close_keeping_heap();
                        return Ok(progress.set_state(NextState::NoMoreValues));
                    }
                    self.policy.clear_current_row();
                    self.seek_or_skip_to_next_row(&cell)?;
                }

                MatchCode::SeekNextCol => self.seek_or_skip_to_next_column(&cell)?,

                MatchCode::Skip => self.heap_advance()?,

                MatchCode::SeekUsingHint => match self.policy.next_key_hint(&cell) {
                    Some(hint) => {
                        self.reseek(&hint)?;
                    }
                    None => self.heap_advance()?,
                },
            }

            match self.peek().cloned() {
                Some(next) => cell = next,
                None => break,
            }
        }

        if count > 0 {
            return Ok(progress.set_state(NextState::MoreValues));
        }
        self.close_keeping_heap();
        Ok(progress.set_state(NextState::NoMoreValues))
    }

    fn check_scan_order(&self, cell: &Cell) {
        debug_assert!(
            self.prev_cell
                .as_ref()
                .map_or(true, |prev| self.comparator.compare(prev, cell) != Ordering::Greater),
            "key {:?} followed by a smaller key {:?}",
            self.prev_cell,
            cell
        );
    }

    fn heap_advance(&mut self) -> Result<()> {
        if let Some(heap) = self.heap.as_mut() {
            let result = heap.advance();
            self.collect_exhausted();
            result?;
        }
        Ok(())
    }

    fn collect_exhausted(&mut self) {
        if let Some(heap) = self.heap.as_mut() {
            let spent = heap.take_exhausted();
            self.delayed_close.extend(spent);
        }
    }

    /// Skip forward cell by cell while the sparse index proves the next
    /// block still starts inside `cell`'s row; fall back to `false` (seek
    /// required) the moment it does not, or when no index exists.
    fn try_skip_to_next_row(&mut self, cell: &Cell) -> Result<bool> {
        loop {
            let can_skip = match self.heap.as_ref() {
                Some(heap) => match heap.next_indexed_key() {
                    Some(indexed) => self.policy.compare_key_for_next_row(indexed, cell).is_ge(),
                    None => false,
                },
                None => return Ok(false),
            };
            if !can_skip {
                return Ok(false);
            }
            self.heap_advance()?;
            self.cells_scanned += 1;
            match self.peek() {
                Some(next) if next.same_row(cell) => continue,
                _ => return Ok(true),
            }
        }
    }

    /// Same, within a single column.
    fn try_skip_to_next_column(&mut self, cell: &Cell) -> Result<bool> {
        loop {
            let can_skip = match self.heap.as_ref() {
                Some(heap) => match heap.next_indexed_key() {
                    Some(indexed) => self
                        .policy
                        .compare_key_for_next_column(indexed, cell)
                        .is_ge(),
                    None => false,
                },
                None => return Ok(false),
            };
            if !can_skip {
                return Ok(false);
            }
            self.heap_advance()?;
            self.cells_scanned += 1;
            match self.peek() {
                Some(next) if next.same_row_column(cell) => continue,
                _ => return Ok(true),
            }
        }
    }

    fn seek_or_skip_to_next_row(&mut self, cell: &Cell) -> Result<()> {
        // A get never leaves its row; skipping buys nothing.
        if !self.is_get && self.try_skip_to_next_row(cell)? {
            return Ok(());
        }
        self.seek_to_next_row(cell)?;
        Ok(())
    }

    fn seek_or_skip_to_next_column(&mut self, cell: &Cell) -> Result<()> {
        if !self.try_skip_to_next_column(cell)? {
            let key = self.policy.key_for_next_column(cell);
            self.reseek(&key)?;
        }
        Ok(())
    }

    fn seek_to_next_row(&mut self, cell: &Cell) -> Result<bool> {
        self.reseek(&Cell::last_on_row(cell.row.clone()))
    }

    fn check_flushed(&self) -> bool {
        self.flush_signal.check_flushed(self.closing)
    }

    /// Re-seat the scanner over the post-flush view: open sources for the
    /// flushed files, adopt the replacement memstore scanners, retire the
    /// old ones into the delayed-close list, and re-arm the policy if the
    /// top row moved. Returns whether the top changed (the caller should
    /// yield instead of continuing on stale state).
    fn reopen_after_flush(&mut self) -> Result<bool> {
        let Some(store) = self.store.clone() else {
            self.flush_signal.close_pending();
            return Ok(false);
        };
        let Some(last_top) = self.peek().cloned() else {
            // Pre-flush view already drained; the flushed data was visible
            // through the sources we just finished with.
            self.flush_signal.close_pending();
            return Ok(false);
        };
        let timer = kiri_core::metrics::Timer::new("reopen_after_flush");
        let (files, memstore_scanners) = self.flush_signal.take_pending();
        let mut candidates =
            store.scanners_for_files(&files, &self.scan, self.scan_use_pread, self.read_point)?;
        candidates.extend(memstore_scanners);
        let mut scanners = select_scanners(candidates, &self.scan, self.ttl_cutoff());
        self.seek_scanners(&mut scanners, &last_top, false, self.parallel_seek_pool.is_some())?;

        // Old memstore scanners may have cells en route to the caller;
        // park them until shipped(). File scanners stay in place.
        let mut kept: Vec<Box<dyn SourceScanner>> = Vec::new();
        if let Some(heap) = self.heap.as_mut() {
            for scanner in heap.drain_scanners() {
                if scanner.is_file_scanner() {
                    kept.push(scanner);
                } else {
                    self.delayed_close.push(scanner);
                }
            }
        }
        self.collect_exhausted();
        kept.extend(scanners);
        self.heap = Some(MergeHeap::new(kept, self.comparator));
        self.reset_policy_row(&last_top);
        self.metrics.record_flush_reopen();

        let top_changed = match self.peek() {
            None => true,
            Some(top) => self.comparator.compare_rows(top, &last_top) != Ordering::Equal,
        };
        if top_changed {
            debug!(before = ?last_top, after = ?self.peek(), "scanner top changed across flush reopen");
        }
        timer.stop();
        Ok(top_changed)
    }

    /// Re-arm the match policy after the heap was rebuilt, but only when
    /// the row actually changed; re-arming mid-row would reset version
    /// and delete tracking.
    fn reset_policy_row(&mut self, last_top: &Cell) {
        let cell = self.peek().cloned().unwrap_or_else(|| last_top.clone());
        let row_changed = self
            .policy
            .current_row()
            .map_or(true, |row| *row != cell.row);
        if row_changed {
            self.count_per_row = 0;
            self.policy.set_to_new_row(&cell);
        }
    }

    /// Swap pread file sources for streaming ones once the scan has read
    /// past the threshold. Best effort: any failure is logged, half-built
    /// scanners are closed, and the scan continues in pread mode.
    fn try_switch_to_stream_read(&mut self) {
        if self.read_type != ReadType::Default || !self.scan_use_pread || self.closing {
            return;
        }
        if self.bytes_read < self.pread_max_bytes {
            return;
        }
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(last_top) = self.peek().cloned() else {
            return;
        };
        debug!(
            bytes_read = self.bytes_read,
            "switching scanner from pread to stream read"
        );

        let name_to_file: HashMap<String, FileHandle> = store
            .storefiles()
            .into_iter()
            .map(|handle| (handle.name.clone(), handle))
            .collect();
        let mut files_to_reopen = Vec::new();
        if let Some(heap) = self.heap.as_ref() {
            for name in heap.file_names() {
                match name_to_file.get(&name) {
                    Some(handle) => files_to_reopen.push(handle.clone()),
                    None => {
                        warn!(file = %name, "store file vanished; staying in pread mode");
                        return;
                    }
                }
            }
        }
        if files_to_reopen.is_empty() {
            return;
        }

        let mut file_scanners =
            match store.scanners_for_files(&files_to_reopen, &self.scan, false, self.read_point) {
                Ok(scanners) => scanners,
                Err(e) => {
                    warn!(error = %e, "failed to open stream readers; staying in pread mode");
                    return;
                }
            };
        if let Err(e) = self.seek_scanners(
            &mut file_scanners,
            &last_top,
            false,
            self.parallel_seek_pool.is_some(),
        ) {
            warn!(error = %e, "failed to seek stream readers; staying in pread mode");
            for scanner in &mut file_scanners {
                scanner.close();
            }
            return;
        }

        // Commit: keep the memstore scanners, displace the pread file
        // scanners. shipped() already secured every outstanding cell, so
        // the displaced scanners can close immediately.
        let mut to_close = Vec::new();
        let mut new_scanners = file_scanners;
        if let Some(heap) = self.heap.as_mut() {
            for scanner in heap.drain_scanners() {
                if scanner.is_file_scanner() {
                    to_close.push(scanner);
                } else {
                    new_scanners.push(scanner);
                }
            }
        }
        self.collect_exhausted();
        self.heap = Some(MergeHeap::new(new_scanners, self.comparator));
        self.scan_use_pread = false;
        self.reset_policy_row(&last_top);
        for mut scanner in to_close {
            scanner.close();
        }
        self.metrics.record_stream_switch();
    }

    /// The caller has copied or released every cell we returned: secure
    /// `prev_cell`, drop delayed-close sources, and consider the
    /// pread-to-stream switch.
    pub fn shipped(&mut self) -> Result<()> {
        if let Some(prev) = &self.prev_cell {
            self.prev_cell = Some(prev.deep_copy());
        }
        self.policy.before_shipped();
        for scanner in &mut self.delayed_close {
            scanner.close();
        }
        self.delayed_close.clear();
        if let Some(mut parked) = self.parked_heap.take() {
            parked.close();
        }
        if let Some(heap) = self.heap.as_mut() {
            heap.shipped()?;
        }
        if self.heap.is_some() {
            self.try_switch_to_stream_read();
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.do_close(true);
    }

    /// End-of-data variant: everything shuts down except the heap, which
    /// is parked until `shipped()` because returned cells may still
    /// borrow from its blocks.
    fn close_keeping_heap(&mut self) {
        self.do_close(false);
    }

    fn do_close(&mut self, with_delayed_close: bool) {
        if self.closing {
            return;
        }
        if with_delayed_close {
            self.closing = true;
        }
        if let Some(store) = &self.store {
            store.delete_changed_reader_observer(&self.flush_signal);
        }
        if with_delayed_close {
            for scanner in &mut self.delayed_close {
                scanner.close();
            }
            self.delayed_close.clear();
            if let Some(mut parked) = self.parked_heap.take() {
                parked.close();
            }
            self.flush_signal.close_pending();
            if let Some(mut heap) = self.heap.take() {
                heap.close();
            }
        } else if let Some(heap) = self.heap.take() {
            self.parked_heap = Some(heap);
        }
    }
}

impl Drop for StoreScanner {
    fn drop(&mut self) {
        self.close();
    }
}
