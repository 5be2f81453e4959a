//! End-to-end scans over real memstore segments through the public API.

use std::sync::Arc;

use bytes::Bytes;
use kiri_core::{Cell, CellKind};
use kiri_storage::{
    MemStoreSegment, ScanInfo, ScanProgress, ScanSpec, SourceScanner, StoreScanner, TimeRange,
};

fn put(row: &str, qual: &str, ts: u64, seq: u64, value: &str) -> Cell {
    Cell::put(
        row.as_bytes().to_vec(),
        qual.as_bytes().to_vec(),
        ts,
        value.as_bytes().to_vec(),
    )
    .with_sequence(seq)
}

fn marker(row: &str, qual: &str, ts: u64, kind: CellKind) -> Cell {
    Cell::new(
        row.as_bytes().to_vec(),
        qual.as_bytes().to_vec(),
        ts,
        kind,
        Bytes::new(),
    )
}

fn segment(cells: Vec<Cell>) -> Arc<MemStoreSegment> {
    let segment = Arc::new(MemStoreSegment::new());
    for cell in cells {
        segment.insert(cell);
    }
    segment
}

fn scanner_over(
    segments: &[Arc<MemStoreSegment>],
    scan: ScanSpec,
    read_point: u64,
) -> StoreScanner {
    let sources: Vec<Box<dyn SourceScanner>> = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            Box::new(segment.scanner(read_point, i as u64)) as Box<dyn SourceScanner>
        })
        .collect();
    StoreScanner::user_scan_with_sources(scan, ScanInfo::default(), sources, read_point).unwrap()
}

fn collect(scanner: &mut StoreScanner) -> Vec<Cell> {
    let mut out = Vec::new();
    loop {
        let mut progress = ScanProgress::unlimited();
        if !scanner.next(&mut out, &mut progress).unwrap() {
            break;
        }
    }
    out
}

fn coords(cells: &[Cell]) -> Vec<(Bytes, Bytes, u64)> {
    cells
        .iter()
        .map(|c| (c.row.clone(), c.qualifier.clone(), c.timestamp))
        .collect()
}

#[test]
fn test_merges_segments_row_by_row() {
    let seg1 = segment(vec![
        put("r1", "c1", 2, 1, "a"),
        put("r2", "c1", 4, 2, "c"),
    ]);
    let seg2 = segment(vec![
        put("r1", "c2", 9, 3, "b"),
        put("r3", "c1", 1, 4, "d"),
    ]);
    let mut scanner = scanner_over(&[seg1, seg2], ScanSpec::new(), u64::MAX);
    let out = collect(&mut scanner);
    assert_eq!(
        coords(&out),
        vec![
            (Bytes::from_static(b"r1"), Bytes::from_static(b"c1"), 2),
            (Bytes::from_static(b"r1"), Bytes::from_static(b"c2"), 9),
            (Bytes::from_static(b"r2"), Bytes::from_static(b"c1"), 4),
            (Bytes::from_static(b"r3"), Bytes::from_static(b"c1"), 1),
        ]
    );
}

#[test]
fn test_max_versions_caps_each_column() {
    let seg = segment(vec![
        put("r1", "c1", 3, 1, "v3"),
        put("r1", "c1", 2, 2, "v2"),
        put("r1", "c1", 1, 3, "v1"),
    ]);
    let mut scanner = scanner_over(
        &[seg],
        ScanSpec::new().with_max_versions(2),
        u64::MAX,
    );
    let out = collect(&mut scanner);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].timestamp, 3);
    assert_eq!(out[1].timestamp, 2);
}

#[test]
fn test_delete_markers_shadow_and_stay_hidden() {
    let seg = segment(vec![
        put("r1", "c1", 5, 1, "live"),
        marker("r1", "c1", 4, CellKind::DeleteColumn).with_sequence(2),
        put("r1", "c1", 3, 3, "dead"),
        put("r1", "c2", 2, 4, "other"),
    ]);
    let mut scanner = scanner_over(&[seg], ScanSpec::new().with_max_versions(10), u64::MAX);
    let out = collect(&mut scanner);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].value, "live");
    assert_eq!(out[1].value, "other");
    assert!(out.iter().all(|c| c.kind == CellKind::Put));
}

#[test]
fn test_read_point_selects_visible_write() {
    let seg = segment(vec![
        put("r1", "c1", 1, 9, "v9"),
        put("r1", "c1", 1, 5, "v5"),
    ]);

    let mut latest = scanner_over(&[seg.clone()], ScanSpec::new(), u64::MAX);
    let out = collect(&mut latest);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, "v9");

    let mut isolated = scanner_over(&[seg], ScanSpec::new(), 6);
    let out = collect(&mut isolated);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, "v5");
}

#[test]
fn test_row_offset_and_limit() {
    let seg = segment(vec![
        put("r1", "c1", 1, 1, "a"),
        put("r1", "c2", 1, 2, "b"),
        put("r1", "c3", 1, 3, "c"),
        put("r2", "c1", 1, 4, "d"),
        put("r2", "c2", 1, 5, "e"),
    ]);
    let mut scanner = scanner_over(
        &[seg],
        ScanSpec::new().with_store_limit(1, 1),
        u64::MAX,
    );
    let out = collect(&mut scanner);
    let values: Vec<_> = out.iter().map(|c| c.value.clone()).collect();
    assert_eq!(values, vec!["b", "e"]);
}

#[test]
fn test_time_range_bounds_versions() {
    let seg = segment(vec![
        put("r1", "c1", 9, 1, "too-new"),
        put("r1", "c1", 5, 2, "in-range"),
        put("r1", "c1", 1, 3, "too-old"),
    ]);
    let mut scanner = scanner_over(
        &[seg],
        ScanSpec::new()
            .with_max_versions(10)
            .with_time_range(TimeRange::new(3, 8)),
        u64::MAX,
    );
    let out = collect(&mut scanner);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, "in-range");
}

#[test]
fn test_row_range_scan() {
    let seg = segment(vec![
        put("r1", "c1", 1, 1, "a"),
        put("r2", "c1", 1, 2, "b"),
        put("r3", "c1", 1, 3, "c"),
        put("r4", "c1", 1, 4, "d"),
    ]);
    let mut scanner = scanner_over(
        &[seg],
        ScanSpec::range(&b"r2"[..], &b"r4"[..]),
        u64::MAX,
    );
    let out = collect(&mut scanner);
    let rows: Vec<_> = out.iter().map(|c| c.row.clone()).collect();
    assert_eq!(rows, vec![Bytes::from_static(b"r2"), Bytes::from_static(b"r3")]);
}

#[test]
fn test_peek_is_stable_and_shipped_is_safe_mid_scan() {
    let seg = segment(vec![
        put("r1", "c1", 1, 1, "a"),
        put("r2", "c1", 1, 2, "b"),
    ]);
    let mut scanner = scanner_over(&[seg], ScanSpec::new(), u64::MAX);

    let mut out = Vec::new();
    let mut progress = ScanProgress::unlimited();
    assert!(scanner.next(&mut out, &mut progress).unwrap());
    assert_eq!(out.len(), 1);

    let before = scanner.peek().cloned();
    assert_eq!(scanner.peek().cloned(), before);
    scanner.shipped().unwrap();
    // Shipping must not move the cursor.
    assert_eq!(scanner.peek().cloned(), before);

    let rest = collect(&mut scanner);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].value, "b");
}

#[test]
fn test_raw_scan_with_columns_is_rejected() {
    let seg = segment(vec![put("r1", "c1", 1, 1, "a")]);
    let sources: Vec<Box<dyn SourceScanner>> =
        vec![Box::new(seg.scanner(u64::MAX, 0)) as Box<dyn SourceScanner>];
    let result = StoreScanner::user_scan_with_sources(
        ScanSpec::new().with_columns([&b"c1"[..]]).with_raw(true),
        ScanInfo::default(),
        sources,
        u64::MAX,
    );
    assert!(result.is_err());
}
