pub mod download;
pub mod normalize;

use serde::Serialize;

/// How often a pass logs its running totals.
const PROGRESS_EVERY: usize = 10;

/// Aggregate result of a download or normalize pass.
///
/// Per-item failures never abort a pass; they are recorded on the record and
/// counted here, so `succeeded + failed == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Running counters for a pass, logging a progress line as items settle.
pub(crate) struct Progress {
    stage: &'static str,
    outcome: BatchOutcome,
}

impl Progress {
    pub(crate) fn new(stage: &'static str, total: usize) -> Self {
        Self {
            stage,
            outcome: BatchOutcome {
                total,
                ..Default::default()
            },
        }
    }

    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.outcome.succeeded += 1;
        } else {
            self.outcome.failed += 1;
        }
        let done = self.outcome.succeeded + self.outcome.failed;
        if done % PROGRESS_EVERY == 0 || done == self.outcome.total {
            log::info!(
                "{} progress: {}/{} (succeeded: {}, failed: {})",
                self.stage,
                done,
                self.outcome.total,
                self.outcome.succeeded,
                self.outcome.failed
            );
        }
    }

    pub(crate) fn finish(self) -> BatchOutcome {
        log::info!(
            "{} pass complete: {} succeeded, {} failed",
            self.stage,
            self.outcome.succeeded,
            self.outcome.failed
        );
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts_sum_to_total() {
        let mut progress = Progress::new("test", 3);
        progress.record(true);
        progress.record(false);
        progress.record(true);
        let outcome = progress.finish();
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.succeeded + outcome.failed, outcome.total);
    }
}
