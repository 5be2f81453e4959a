//! # Store Collaborator
//!
//! What the scanner needs from the column-family store it reads: fresh
//! source scanners over the current files and memstore, file metadata,
//! and a way to hear about flushes without owning the store (or being
//! owned by it).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rayon::ThreadPool;

use kiri_core::{CellComparator, Result};

use crate::scan::ScanSpec;
use crate::scanner::SourceScanner;

/// Opaque handle to one immutable store file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    pub name: String,
}

impl FileHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The scanner's view of its store.
pub trait StoreView: Send + Sync {
    /// Fresh source scanners over the current files and memstore,
    /// constrained by the scan's row range and column hint.
    fn scanners(
        &self,
        scan: &ScanSpec,
        use_pread: bool,
        is_compaction: bool,
        read_point: u64,
    ) -> Result<Vec<Box<dyn SourceScanner>>>;

    /// Source scanners over an explicit subset of files.
    fn scanners_for_files(
        &self,
        files: &[FileHandle],
        scan: &ScanSpec,
        use_pread: bool,
        read_point: u64,
    ) -> Result<Vec<Box<dyn SourceScanner>>>;

    fn comparator(&self) -> CellComparator {
        CellComparator
    }

    fn storefiles_count(&self) -> usize;

    fn storefiles(&self) -> Vec<FileHandle>;

    /// Register a scanner's flush observer. The store keeps a weak handle
    /// only; a dropped scanner must never keep the observer table alive.
    fn add_changed_reader_observer(&self, observer: Weak<FlushSignal>);

    fn delete_changed_reader_observer(&self, observer: &Arc<FlushSignal>);

    /// Thread pool used for parallel seeks, when the store provides one.
    fn seek_pool(&self) -> Option<Arc<ThreadPool>> {
        None
    }
}

#[derive(Default)]
struct PendingReaders {
    files: Vec<FileHandle>,
    memstore_scanners: Vec<Box<dyn SourceScanner>>,
}

/// The flush-side half of a scanner: the flag and pending reader lists a
/// flush thread fills while the reader keeps scanning the old view. The
/// reader drains it lazily at its next `next` or `seek`.
#[derive(Default)]
pub struct FlushSignal {
    flushed: AtomicBool,
    pending: Mutex<PendingReaders>,
}

impl FlushSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the flush thread: publish the new files and replacement
    /// memstore scanners. Never touches the reader's heap.
    pub fn notify(
        &self,
        files: Vec<FileHandle>,
        memstore_scanners: Vec<Box<dyn SourceScanner>>,
    ) {
        if files.is_empty() && memstore_scanners.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        pending.files.extend(files);
        if !memstore_scanners.is_empty() {
            for scanner in &mut pending.memstore_scanners {
                scanner.close();
            }
            pending.memstore_scanners = memstore_scanners;
        }
        // Publish while still holding the lock so a reader that observes
        // the flag also observes fully populated pending lists.
        self.flushed.store(true, Ordering::Release);
    }

    /// Reader-side check-and-clear. A missed notification is fine; the
    /// reader continues on the pre-flush view and sees the flag next call.
    pub(crate) fn check_flushed(&self, closing: bool) -> bool {
        if !self.flushed.load(Ordering::Acquire) {
            return false;
        }
        if closing {
            return false;
        }
        self.flushed.store(false, Ordering::Release);
        true
    }

    /// Drain the pending lists under the flush lock.
    pub(crate) fn take_pending(&self) -> (Vec<FileHandle>, Vec<Box<dyn SourceScanner>>) {
        let mut pending = self.pending.lock();
        (
            std::mem::take(&mut pending.files),
            std::mem::take(&mut pending.memstore_scanners),
        )
    }

    /// Close anything still parked here; used when the scanner shuts down
    /// before draining.
    pub(crate) fn close_pending(&self) {
        let (_, mut scanners) = self.take_pending();
        for scanner in &mut scanners {
            scanner.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testutil::{cells, FixtureScanner};

    #[test]
    fn test_empty_notify_is_ignored() {
        let signal = FlushSignal::new();
        signal.notify(Vec::new(), Vec::new());
        assert!(!signal.check_flushed(false));
    }

    #[test]
    fn test_notify_sets_flag_once() {
        let signal = FlushSignal::new();
        signal.notify(vec![FileHandle::new("f1")], Vec::new());
        assert!(!signal.check_flushed(true)); // closing scanners ignore it
        assert!(signal.check_flushed(false));
        assert!(!signal.check_flushed(false));
        let (files, scanners) = signal.take_pending();
        assert_eq!(files, vec![FileHandle::new("f1")]);
        assert!(scanners.is_empty());
    }

    #[test]
    fn test_second_flush_replaces_pending_memstore_scanners() {
        let signal = FlushSignal::new();
        signal.notify(
            Vec::new(),
            vec![Box::new(FixtureScanner::memstore(cells(&[("r1", "c1", 1)]), 0))],
        );
        signal.notify(
            Vec::new(),
            vec![Box::new(FixtureScanner::memstore(cells(&[("r2", "c1", 1)]), 1))],
        );
        let (_, scanners) = signal.take_pending();
        assert_eq!(scanners.len(), 1);
        assert_eq!(scanners[0].order(), 1);
    }
}
