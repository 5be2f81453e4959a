//! # Scan Progress
//!
//! Caller-provided budget for one `next` call: batch, size and wall-clock
//! limits, each enforceable at a scope. Row-scoped limits are only checked
//! at row boundaries so a row is never split by them; cell-scoped limits
//! may split a row into partial results.

use std::time::Instant;

/// Where a limit may be enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Checked only between rows.
    BetweenRows,
    /// Checked between individual cells.
    BetweenCells,
}

impl LimitScope {
    fn depth(self) -> u8 {
        match self {
            LimitScope::BetweenRows => 0,
            LimitScope::BetweenCells => 1,
        }
    }

    /// A checkpoint at `self` can enforce a limit declared at `limit` if
    /// it is at least as deep.
    pub fn can_enforce(self, limit: LimitScope) -> bool {
        self.depth() >= limit.depth()
    }
}

/// Terminal state of one `next` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextState {
    #[default]
    MoreValues,
    NoMoreValues,
    TimeLimitReached,
    BatchLimitReached,
    SizeLimitReached,
}

impl NextState {
    /// Whether the caller should keep calling `next`. Limit-reached states
    /// are partial results, not the end of the scan.
    pub fn has_more(self) -> bool {
        !matches!(self, NextState::NoMoreValues)
    }
}

/// Budget and running progress for `next` calls.
pub struct ScanProgress {
    batch_limit: Option<(usize, LimitScope)>,
    size_limit: Option<(u64, LimitScope)>,
    deadline: Option<(Instant, LimitScope)>,

    batch_progress: usize,
    size_progress: u64,
    heap_size_progress: u64,
    time_progress: Instant,

    keep_progress: bool,
    state: NextState,
}

impl ScanProgress {
    /// No limits at all; `next` runs until the row (or scan) ends.
    pub fn unlimited() -> Self {
        Self {
            batch_limit: None,
            size_limit: None,
            deadline: None,
            batch_progress: 0,
            size_progress: 0,
            heap_size_progress: 0,
            time_progress: Instant::now(),
            keep_progress: false,
            state: NextState::MoreValues,
        }
    }

    pub fn with_batch_limit(mut self, cells: usize) -> Self {
        self.batch_limit = Some((cells, LimitScope::BetweenCells));
        self
    }

    pub fn with_size_limit(mut self, bytes: u64, scope: LimitScope) -> Self {
        self.size_limit = Some((bytes, scope));
        self
    }

    pub fn with_deadline(mut self, deadline: Instant, scope: LimitScope) -> Self {
        self.deadline = Some((deadline, scope));
        self
    }

    /// Carry progress across `next` calls instead of resetting per call.
    pub fn with_keep_progress(mut self, keep: bool) -> Self {
        self.keep_progress = keep;
        self
    }

    pub fn keep_progress(&self) -> bool {
        self.keep_progress
    }

    pub fn clear_progress(&mut self) {
        self.batch_progress = 0;
        self.size_progress = 0;
        self.heap_size_progress = 0;
        self.time_progress = Instant::now();
    }

    pub fn increment_batch_progress(&mut self, cells: usize) {
        self.batch_progress += cells;
    }

    pub fn increment_size_progress(&mut self, data_bytes: u64, heap_bytes: u64) {
        self.size_progress += data_bytes;
        self.heap_size_progress += heap_bytes;
    }

    /// Observe the clock; time-limit checks compare against the last
    /// observation, so this is called on the heartbeat cadence rather
    /// than per cell.
    pub fn update_time_progress(&mut self) {
        self.time_progress = Instant::now();
    }

    pub fn batch_progress(&self) -> usize {
        self.batch_progress
    }

    pub fn size_progress(&self) -> u64 {
        self.size_progress
    }

    /// Whether any limit is enforceable from `checker`. Used to decide if
    /// a `next` call may be resuming mid-row.
    pub fn has_any_limit(&self, checker: LimitScope) -> bool {
        self.batch_limit.map_or(false, |(_, s)| checker.can_enforce(s))
            || self.size_limit.map_or(false, |(_, s)| checker.can_enforce(s))
            || self.deadline.map_or(false, |(_, s)| checker.can_enforce(s))
    }

    pub fn check_batch_limit(&self, checker: LimitScope) -> bool {
        self.batch_limit
            .map_or(false, |(limit, scope)| {
                checker.can_enforce(scope) && self.batch_progress >= limit
            })
    }

    pub fn check_size_limit(&self, checker: LimitScope) -> bool {
        self.size_limit.map_or(false, |(limit, scope)| {
            checker.can_enforce(scope) && self.size_progress + self.heap_size_progress >= limit
        })
    }

    pub fn check_time_limit(&self, checker: LimitScope) -> bool {
        self.deadline.map_or(false, |(deadline, scope)| {
            checker.can_enforce(scope) && self.time_progress >= deadline
        })
    }

    /// Record the terminal state and report whether the scan has more
    /// values.
    pub fn set_state(&mut self, state: NextState) -> bool {
        self.state = state;
        state.has_more()
    }

    pub fn state(&self) -> NextState {
        self.state
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scope_enforcement() {
        assert!(LimitScope::BetweenCells.can_enforce(LimitScope::BetweenRows));
        assert!(LimitScope::BetweenCells.can_enforce(LimitScope::BetweenCells));
        assert!(!LimitScope::BetweenRows.can_enforce(LimitScope::BetweenCells));
    }

    #[test]
    fn test_batch_limit() {
        let mut progress = ScanProgress::unlimited().with_batch_limit(2);
        assert!(!progress.check_batch_limit(LimitScope::BetweenCells));
        progress.increment_batch_progress(2);
        assert!(progress.check_batch_limit(LimitScope::BetweenCells));
        progress.clear_progress();
        assert!(!progress.check_batch_limit(LimitScope::BetweenCells));
    }

    #[test]
    fn test_size_limit_counts_heap_and_data() {
        let mut progress =
            ScanProgress::unlimited().with_size_limit(100, LimitScope::BetweenCells);
        progress.increment_size_progress(60, 0);
        assert!(!progress.check_size_limit(LimitScope::BetweenCells));
        progress.increment_size_progress(0, 40);
        assert!(progress.check_size_limit(LimitScope::BetweenCells));
    }

    #[test]
    fn test_cell_scoped_limit_not_enforced_between_rows() {
        let mut progress = ScanProgress::unlimited()
            .with_size_limit(1, LimitScope::BetweenCells);
        progress.increment_size_progress(10, 0);
        // A row-boundary checkpoint is too shallow for a cell-scoped limit.
        assert!(!progress.check_size_limit(LimitScope::BetweenRows));
        assert!(progress.check_size_limit(LimitScope::BetweenCells));
    }

    #[test]
    fn test_expired_deadline() {
        let mut progress = ScanProgress::unlimited()
            .with_deadline(Instant::now() - Duration::from_secs(1), LimitScope::BetweenCells);
        progress.update_time_progress();
        assert!(progress.check_time_limit(LimitScope::BetweenCells));
    }

    #[test]
    fn test_limit_states_report_more_values() {
        assert!(NextState::TimeLimitReached.has_more());
        assert!(NextState::BatchLimitReached.has_more());
        assert!(!NextState::NoMoreValues.has_more());
    }
}
