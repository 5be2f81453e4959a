//! Parallel seek: position many file-backed scanners at one key using a
//! shared thread pool, so their block fetches overlap instead of queueing
//! behind each other.

use parking_lot::Mutex;
use rayon::ThreadPool;

use kiri_core::{Cell, Error, Result};

use super::SourceScanner;

/// Seek every scanner to `key`. File scanners are dispatched to `pool`;
/// memstore scanners are seeked inline (they never block on I/O). Blocks
/// until every task completes; the first recorded error is reported as an
/// I/O failure and the whole scanner set must be considered invalid.
pub fn parallel_seek(
    pool: &ThreadPool,
    scanners: &mut [Box<dyn SourceScanner>],
    key: &Cell,
) -> Result<()> {
    if scanners.is_empty() {
        return Ok(());
    }
    let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());
    pool.scope(|scope| {
        for scanner in scanners.iter_mut() {
            if scanner.is_file_scanner() {
                let errors = &errors;
                scope.spawn(move |_| {
                    if let Err(e) = scanner.seek(key) {
                        errors.lock().push(e);
                    }
                });
            } else if let Err(e) = scanner.seek(key) {
                errors.lock().push(e);
            }
        }
    });
    let mut errors = errors.into_inner();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::io(format!("parallel seek failed: {}", errors.remove(0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testutil::{cells, FixtureScanner};
    use bytes::Bytes;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_positions_match_sequential_seek() {
        let data = [
            cells(&[("r1", "c1", 1), ("r3", "c1", 1)]),
            cells(&[("r2", "c1", 1), ("r4", "c1", 1)]),
            cells(&[("r5", "c1", 1)]),
        ];
        let key = Cell::first_on_row(Bytes::from_static(b"r3"));

        let mut parallel: Vec<Box<dyn SourceScanner>> = data
            .iter()
            .enumerate()
            .map(|(i, cells)| {
                Box::new(FixtureScanner::file(cells.clone(), 2, &format!("f{i}"), i as u64))
                    as Box<dyn SourceScanner>
            })
            .collect();
        parallel_seek(&pool(), &mut parallel, &key).unwrap();

        for (i, cells) in data.iter().enumerate() {
            let mut sequential = FixtureScanner::file(cells.clone(), 2, "seq", i as u64);
            sequential.seek(&key).unwrap();
            assert_eq!(
                parallel[i].peek().map(|c| c.row.clone()),
                sequential.peek().map(|c| c.row.clone()),
                "scanner {i} diverged from sequential seek"
            );
        }
    }

    #[test]
    fn test_memstore_scanners_seek_inline() {
        let mut scanners: Vec<Box<dyn SourceScanner>> = vec![Box::new(FixtureScanner::memstore(
            cells(&[("r1", "c1", 1), ("r2", "c1", 1)]),
            0,
        ))];
        let key = Cell::first_on_row(Bytes::from_static(b"r2"));
        parallel_seek(&pool(), &mut scanners, &key).unwrap();
        assert_eq!(scanners[0].peek().unwrap().row, Bytes::from_static(b"r2"));
    }

    #[test]
    fn test_first_error_is_reported() {
        let mut scanners: Vec<Box<dyn SourceScanner>> = vec![Box::new(
            FixtureScanner::file(cells(&[("r1", "c1", 1)]), 2, "bad", 0).with_seek_error(),
        )];
        let key = Cell::first_on_row(Bytes::from_static(b"r1"));
        let err = parallel_seek(&pool(), &mut scanners, &key).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
