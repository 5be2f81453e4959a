//! Source selection: discard candidate scanners that cannot contribute to
//! a scan before paying for a seek on them.

use crate::scan::ScanSpec;

use super::SourceScanner;

/// Keep the candidates that may contain matching cells and close the
/// rest. `ttl_cutoff` is the timestamp below which a source as a whole is
/// expired; `None` disables the cutoff (some expired versions must still
/// be returned when `min_versions` retention is configured).
pub fn select_scanners(
    candidates: Vec<Box<dyn SourceScanner>>,
    scan: &ScanSpec,
    ttl_cutoff: Option<u64>,
) -> Vec<Box<dyn SourceScanner>> {
    let mut selected = Vec::with_capacity(candidates.len());
    for mut scanner in candidates {
        let is_file = scanner.is_file_scanner();
        if (!is_file && scan.files_only) || (is_file && scan.memory_only) {
            scanner.close();
            continue;
        }
        if scanner.should_use(scan, ttl_cutoff) {
            selected.push(scanner);
        } else {
            scanner.close();
        }
    }
    selected
}
