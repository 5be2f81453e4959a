//! # Merge Heap
//!
//! Min-heap over source scanners, keyed by their current cell. The top
//! scanner is held out of the heap so peek/advance touch only it; every
//! mutation re-establishes the invariant that `peek()` is the least
//! remaining cell across all live sources. Exhausted scanners are not
//! closed here: ownership passes back to the caller via `take_exhausted`,
//! which decides between immediate and delayed close.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use kiri_core::{Cell, CellComparator, Result};

use super::SourceScanner;

/// Seek flavor forwarded to the member scanners.
#[derive(Clone, Copy)]
enum SeekMode {
    Seek,
    Reseek,
    RequestSeek { forward: bool, use_bloom: bool },
}

struct HeapNode {
    scanner: Box<dyn SourceScanner>,
    comparator: CellComparator,
}

impl HeapNode {
    fn new(scanner: Box<dyn SourceScanner>, comparator: CellComparator) -> Self {
        Self {
            scanner,
            comparator,
        }
    }
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops its greatest element, so "greater" means "should
        // surface first": the lesser cell, ties going to the newer source.
        match (self.scanner.peek(), other.scanner.peek()) {
            (Some(a), Some(b)) => match self.comparator.compare(a, b) {
                Ordering::Less => Ordering::Greater,
                Ordering::Greater => Ordering::Less,
                Ordering::Equal => self.scanner.order().cmp(&other.scanner.order()),
            },
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Min-heap of source scanners presenting one non-decreasing cell stream.
pub struct MergeHeap {
    current: Option<Box<dyn SourceScanner>>,
    heap: BinaryHeap<HeapNode>,
    comparator: CellComparator,
    exhausted: Vec<Box<dyn SourceScanner>>,
}

impl MergeHeap {
    /// Build a heap from positioned scanners. Scanners that are already
    /// empty are closed right away; nothing has been handed out of them.
    pub fn new(scanners: Vec<Box<dyn SourceScanner>>, comparator: CellComparator) -> Self {
        let mut heap = BinaryHeap::with_capacity(scanners.len());
        for mut scanner in scanners {
            if scanner.peek().is_some() {
                heap.push(HeapNode::new(scanner, comparator));
            } else {
                scanner.close();
            }
        }
        let current = heap.pop().map(|node| node.scanner);
        Self {
            current,
            heap,
            comparator,
            exhausted: Vec::new(),
        }
    }

    /// Least remaining cell across all members.
    pub fn peek(&self) -> Option<&Cell> {
        self.current.as_ref().and_then(|scanner| scanner.peek())
    }

    /// Key at the next sparse-index entry of the top scanner's source.
    pub fn next_indexed_key(&self) -> Option<&Cell> {
        self.current
            .as_ref()
            .and_then(|scanner| scanner.next_indexed_key())
    }

    /// Advance past the current cell.
    pub fn advance(&mut self) -> Result<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        if let Err(e) = current.advance() {
            // Leave the heap at the failed position; the caller closes.
            self.current = Some(current);
            return Err(e);
        }
        self.reseat(current);
        Ok(())
    }

    /// Re-home a scanner after its position changed, promoting whichever
    /// member now holds the least cell.
    fn reseat(&mut self, scanner: Box<dyn SourceScanner>) {
        if scanner.peek().is_none() {
            self.exhausted.push(scanner);
            self.current = self.heap.pop().map(|node| node.scanner);
            return;
        }
        let top_wins = match (self.heap.peek().and_then(|n| n.scanner.peek()), scanner.peek()) {
            (Some(top), Some(cur)) => match self.comparator.compare(top, cur) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => {
                    self.heap
                        .peek()
                        .map_or(false, |n| n.scanner.order() > scanner.order())
                }
            },
            _ => false,
        };
        if top_wins {
            let top = self.heap.pop().map(|node| node.scanner);
            self.heap.push(HeapNode::new(scanner, self.comparator));
            self.current = top;
        } else {
            self.current = Some(scanner);
        }
    }

    pub fn seek(&mut self, key: &Cell) -> Result<bool> {
        self.generalized_seek(key, SeekMode::Seek)
    }

    pub fn reseek(&mut self, key: &Cell) -> Result<bool> {
        self.generalized_seek(key, SeekMode::Reseek)
    }

    pub fn request_seek(&mut self, key: &Cell, forward: bool, use_bloom: bool) -> Result<bool> {
        self.generalized_seek(key, SeekMode::RequestSeek { forward, use_bloom })
    }

    /// Seek every member whose current cell is before `key`; members
    /// already at or past it are left alone.
    fn generalized_seek(&mut self, key: &Cell, mode: SeekMode) -> Result<bool> {
        let Some(current) = self.current.take() else {
            return Ok(false);
        };
        self.seek_member(current, key, mode)?;
        loop {
            let top_needs_seek = match self.heap.peek() {
                Some(node) => node
                    .scanner
                    .peek()
                    .map_or(true, |cell| self.comparator.compare(cell, key) == Ordering::Less),
                None => break,
            };
            if !top_needs_seek {
                break;
            }
            if let Some(node) = self.heap.pop() {
                self.seek_member(node.scanner, key, mode)?;
            }
        }
        self.current = self.heap.pop().map(|node| node.scanner);
        Ok(self.peek().is_some())
    }

    fn seek_member(
        &mut self,
        mut scanner: Box<dyn SourceScanner>,
        key: &Cell,
        mode: SeekMode,
    ) -> Result<()> {
        let already_past = scanner
            .peek()
            .map_or(false, |cell| self.comparator.compare(cell, key) != Ordering::Less);
        if !already_past {
            let result = match mode {
                SeekMode::Seek => scanner.seek(key),
                SeekMode::Reseek => scanner.reseek(key),
                SeekMode::RequestSeek { forward, use_bloom } => {
                    scanner.request_seek(key, forward, use_bloom)
                }
            };
            if let Err(e) = result {
                // Park the scanner for delayed close and surface the error.
                self.exhausted.push(scanner);
                return Err(e);
            }
        }
        if scanner.peek().is_some() {
            self.heap.push(HeapNode::new(scanner, self.comparator));
        } else {
            self.exhausted.push(scanner);
        }
        Ok(())
    }

    /// Hand back the scanners that ran dry since the last call. The caller
    /// owns them now and decides when to close.
    pub fn take_exhausted(&mut self) -> Vec<Box<dyn SourceScanner>> {
        std::mem::take(&mut self.exhausted)
    }

    /// Remove every live member, leaving the heap empty. Exhausted
    /// scanners stay behind for `take_exhausted`.
    pub fn drain_scanners(&mut self) -> Vec<Box<dyn SourceScanner>> {
        let mut scanners = Vec::with_capacity(self.heap.len() + 1);
        if let Some(current) = self.current.take() {
            scanners.push(current);
        }
        scanners.extend(
            std::mem::take(&mut self.heap)
                .into_vec()
                .into_iter()
                .map(|node| node.scanner),
        );
        scanners
    }

    /// Backing file names of the live file-backed members.
    pub fn file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(current) = self.current.as_ref() {
            if let Some(name) = current.file_name() {
                names.push(name.to_string());
            }
        }
        for node in self.heap.iter() {
            if let Some(name) = node.scanner.file_name() {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Broadcast `shipped()` to every live member.
    pub fn shipped(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(current) = self.current.as_mut() {
            result = current.shipped();
        }
        let mut nodes = std::mem::take(&mut self.heap).into_vec();
        for node in &mut nodes {
            if result.is_ok() {
                result = node.scanner.shipped();
            }
        }
        self.heap = BinaryHeap::from(nodes);
        result
    }

    pub fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        for mut node in std::mem::take(&mut self.heap).into_vec() {
            node.scanner.close();
        }
        for mut scanner in std::mem::take(&mut self.exhausted) {
            scanner.close();
        }
    }
}
