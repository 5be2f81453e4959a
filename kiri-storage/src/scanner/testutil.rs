//! In-memory fixtures shared by the scanner unit tests: a scriptable
//! source scanner (with synthetic blocks, bloom behavior and failure
//! injection) and a stub store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use kiri_core::{Cell, CellComparator, CellKind, Error, Result};

use crate::scan::ScanSpec;
use crate::scanner::SourceScanner;
use crate::store::{FileHandle, FlushSignal, StoreView};

pub(crate) fn cells(specs: &[(&str, &str, u64)]) -> Vec<Cell> {
    specs
        .iter()
        .map(|(row, qual, ts)| vcell(row, qual, *ts, "v"))
        .collect()
}

pub(crate) fn vcell(row: &str, qual: &str, ts: u64, value: &str) -> Cell {
    Cell::put(
        row.as_bytes().to_vec(),
        qual.as_bytes().to_vec(),
        ts,
        value.as_bytes().to_vec(),
    )
}

pub(crate) fn kcell(row: &str, qual: &str, ts: u64, kind: CellKind) -> Cell {
    Cell::new(
        row.as_bytes().to_vec(),
        qual.as_bytes().to_vec(),
        ts,
        kind,
        Bytes::new(),
    )
}

/// Externally observable fixture-scanner counters, for asserting on a
/// scanner after ownership moved into the scanner under test.
#[derive(Default)]
pub(crate) struct FixtureStats {
    pub(crate) seeks: AtomicU64,
    pub(crate) request_seeks: AtomicU64,
    pub(crate) closed: AtomicBool,
}

/// Scriptable in-memory source scanner.
pub(crate) struct FixtureScanner {
    cells: Vec<Cell>,
    pos: usize,
    block_size: usize,
    is_file: bool,
    name: Option<String>,
    order: u64,
    bloom_rows: Option<HashSet<Bytes>>,
    fail_seek: bool,
    stats: Option<Arc<FixtureStats>>,
    #[allow(dead_code)]
    tag: String,
}

impl FixtureScanner {
    fn new(mut cells: Vec<Cell>, block_size: usize, is_file: bool, order: u64) -> Self {
        cells.sort_by(|a, b| CellComparator.compare(a, b));
        Self {
            cells,
            pos: 0,
            block_size,
            is_file,
            name: None,
            order,
            bloom_rows: None,
            fail_seek: false,
            stats: None,
            tag: String::new(),
        }
    }

    pub(crate) fn memstore(cells: Vec<Cell>, order: u64) -> Self {
        Self::new(cells, 0, false, order)
    }

    /// A file-like source with a sparse index every `block_size` cells.
    pub(crate) fn file(cells: Vec<Cell>, block_size: usize, name: &str, order: u64) -> Self {
        let mut scanner = Self::new(cells, block_size, true, order);
        scanner.name = Some(name.to_string());
        scanner
    }

    pub(crate) fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    /// Rows the simulated row bloom filter claims to contain; request_seek
    /// proves emptiness for any other row.
    pub(crate) fn with_bloom_rows<I: IntoIterator<Item = &'static str>>(mut self, rows: I) -> Self {
        self.bloom_rows = Some(
            rows.into_iter()
                .map(|r| Bytes::copy_from_slice(r.as_bytes()))
                .collect(),
        );
        self
    }

    pub(crate) fn with_seek_error(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    pub(crate) fn with_stats(mut self, stats: Arc<FixtureStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn position_of(&self, key: &Cell) -> usize {
        self.cells
            .partition_point(|cell| CellComparator.compare(cell, key) == std::cmp::Ordering::Less)
    }
}

impl SourceScanner for FixtureScanner {
    fn peek(&self) -> Option<&Cell> {
        self.cells.get(self.pos)
    }

    fn advance(&mut self) -> Result<()> {
        if self.pos < self.cells.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &Cell) -> Result<bool> {
        if self.fail_seek {
            return Err(Error::io("injected seek failure"));
        }
        if let Some(stats) = &self.stats {
            stats.seeks.fetch_add(1, Ordering::Relaxed);
        }
        self.pos = self.position_of(key);
        Ok(self.pos < self.cells.len())
    }

    fn reseek(&mut self, key: &Cell) -> Result<bool> {
        if self.fail_seek {
            return Err(Error::io("injected seek failure"));
        }
        if let Some(stats) = &self.stats {
            stats.seeks.fetch_add(1, Ordering::Relaxed);
        }
        self.pos = self.pos.max(self.position_of(key));
        Ok(self.pos < self.cells.len())
    }

    fn request_seek(&mut self, key: &Cell, _forward: bool, use_bloom: bool) -> Result<bool> {
        if let Some(stats) = &self.stats {
            stats.request_seeks.fetch_add(1, Ordering::Relaxed);
        }
        if use_bloom {
            if let Some(bloom) = &self.bloom_rows {
                if !bloom.contains(&key.row) {
                    self.pos = self.cells.len();
                    return Ok(false);
                }
            }
        }
        self.seek(key)
    }

    fn next_indexed_key(&self) -> Option<&Cell> {
        if self.block_size == 0 {
            return None;
        }
        let next_block_start = (self.pos / self.block_size + 1) * self.block_size;
        self.cells.get(next_block_start)
    }

    fn is_file_scanner(&self) -> bool {
        self.is_file
    }

    fn file_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn should_use(&self, scan: &ScanSpec, ttl_cutoff: Option<u64>) -> bool {
        let Some(min) = self.cells.iter().map(|c| c.timestamp).min() else {
            return false;
        };
        let max = self.cells.iter().map(|c| c.timestamp).max().unwrap_or(min);
        scan.time_range.overlaps(min, max) && ttl_cutoff.map_or(true, |cutoff| max >= cutoff)
    }

    fn order(&self) -> u64 {
        self.order
    }

    fn close(&mut self) {
        if let Some(stats) = &self.stats {
            stats.closed.store(true, Ordering::Relaxed);
        }
    }
}

/// Stub store serving fixture scanners, with open-mode counters so tests
/// can observe the pread-to-stream switch.
pub(crate) struct MockStore {
    files: Mutex<Vec<(FileHandle, Vec<Cell>)>>,
    memstore: Mutex<Vec<Vec<Cell>>>,
    observers: Mutex<Vec<Weak<FlushSignal>>>,
    next_order: AtomicU64,
    pub(crate) pread_opens: AtomicUsize,
    pub(crate) stream_opens: AtomicUsize,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self {
            files: Mutex::new(Vec::new()),
            memstore: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            next_order: AtomicU64::new(0),
            pread_opens: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn add_file(&self, name: &str, cells: Vec<Cell>) {
        self.files.lock().push((FileHandle::new(name), cells));
    }

    pub(crate) fn add_memstore(&self, cells: Vec<Cell>) {
        self.memstore.lock().push(cells);
    }

    fn next_order(&self) -> u64 {
        self.next_order.fetch_add(1, Ordering::Relaxed)
    }

    /// Simulate a flush: register the new file and hand every observer the
    /// new file handle plus a replacement memstore scanner.
    pub(crate) fn flush(&self, name: &str, file_cells: Vec<Cell>, remaining_memstore: Vec<Cell>) {
        self.add_file(name, file_cells);
        *self.memstore.lock() = vec![remaining_memstore.clone()];
        let observers = self.observers.lock();
        for observer in observers.iter() {
            if let Some(signal) = observer.upgrade() {
                let scanner: Box<dyn SourceScanner> = Box::new(FixtureScanner::memstore(
                    remaining_memstore.clone(),
                    self.next_order() + 1000,
                ));
                signal.notify(vec![FileHandle::new(name)], vec![scanner]);
            }
        }
    }

    fn count_open(&self, use_pread: bool) {
        if use_pread {
            self.pread_opens.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stream_opens.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl StoreView for MockStore {
    fn scanners(
        &self,
        _scan: &ScanSpec,
        use_pread: bool,
        _is_compaction: bool,
        _read_point: u64,
    ) -> Result<Vec<Box<dyn SourceScanner>>> {
        let mut out: Vec<Box<dyn SourceScanner>> = Vec::new();
        for (handle, cells) in self.files.lock().iter() {
            self.count_open(use_pread);
            out.push(Box::new(FixtureScanner::file(
                cells.clone(),
                2,
                &handle.name,
                self.next_order(),
            )));
        }
        for cells in self.memstore.lock().iter() {
            out.push(Box::new(FixtureScanner::memstore(
                cells.clone(),
                self.next_order() + 1000,
            )));
        }
        Ok(out)
    }

    fn scanners_for_files(
        &self,
        files: &[FileHandle],
        _scan: &ScanSpec,
        use_pread: bool,
        _read_point: u64,
    ) -> Result<Vec<Box<dyn SourceScanner>>> {
        let known = self.files.lock();
        let mut out: Vec<Box<dyn SourceScanner>> = Vec::new();
        for handle in files {
            let Some((_, cells)) = known.iter().find(|(h, _)| h == handle) else {
                return Err(Error::io(format!("unknown store file {}", handle.name)));
            };
            self.count_open(use_pread);
            out.push(Box::new(FixtureScanner::file(
                cells.clone(),
                2,
                &handle.name,
                self.next_order(),
            )));
        }
        Ok(out)
    }

    fn storefiles_count(&self) -> usize {
        self.files.lock().len()
    }

    fn storefiles(&self) -> Vec<FileHandle> {
        self.files.lock().iter().map(|(h, _)| h.clone()).collect()
    }

    fn add_changed_reader_observer(&self, observer: Weak<FlushSignal>) {
        self.observers.lock().push(observer);
    }

    fn delete_changed_reader_observer(&self, observer: &Arc<FlushSignal>) {
        self.observers
            .lock()
            .retain(|weak| match weak.upgrade() {
                Some(existing) => !Arc::ptr_eq(&existing, observer),
                None => false,
            });
    }
}
