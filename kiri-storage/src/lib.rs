//! # KiriDB Storage — Read Path
//!
//! The merged read view over one column family: memstore segments plus
//! immutable store files, presented as a single per-row, version-aware,
//! non-decreasing cell stream.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Read Path                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   ScanSpec ──> StoreScanner ──> Vec<Cell> batches            │
//! │                  │    │                                      │
//! │                  │    └── ScanPolicy (versions, deletes,     │
//! │                  │         TTL, columns, filter)             │
//! │                  ▼                                           │
//! │               MergeHeap                                      │
//! │              /    |     \                                    │
//! │          file   file   memstore        <- SourceScanner      │
//! │                                                              │
//! │   Flush thread ──> FlushSignal ──(lazy)──> reopen            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod filter;
pub mod memstore;
pub mod scan;
pub mod scanner;
pub mod store;

// Re-export the main surface
pub use filter::{Filter, FilterDecision};
pub use memstore::{MemStoreScanner, MemStoreSegment};
pub use scan::{ReadType, ScanInfo, ScanSpec, TimeRange};
pub use scanner::{
    parallel_seek, select_scanners, LimitScope, MatchCode, MergeHeap, NextState, ScanPolicy,
    ScanProgress, SourceScanner, StoreScanner,
};
pub use store::{FileHandle, FlushSignal, StoreView};
