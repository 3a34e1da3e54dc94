use crate::error::IndexingError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum RunOutcome {
    Running,
    Completed,
    /// Finished, but some documents were not indexed.
    Degraded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunCounters {
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub indexed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub kind: RunKind,
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub indexed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn started(kind: RunKind) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            kind,
            discovered: 0,
            succeeded: 0,
            failed: 0,
            indexed: 0,
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::Running,
        }
    }

    pub fn is_active(&self) -> bool {
        self.outcome == RunOutcome::Running
    }

    fn apply(&mut self, counters: RunCounters) {
        self.discovered = counters.discovered;
        self.succeeded = counters.succeeded;
        self.failed = counters.failed;
        self.indexed = counters.indexed;
    }
}

#[derive(Debug, Default)]
struct RunState {
    current: Option<RunSummary>,
}

/// Single owner of the indexing run record. At most one run is active; the
/// last finished run stays visible until the next one starts.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    state: Arc<Mutex<RunState>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        // The state is plain data; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_start(&self, kind: RunKind) -> Result<RunGuard, IndexingError> {
        let mut state = self.lock();
        if let Some(active) = state.current.as_ref().filter(|run| run.is_active()) {
            return Err(IndexingError::Conflict {
                run_id: active.run_id.clone(),
            });
        }

        let summary = RunSummary::started(kind);
        let run_id = summary.run_id.clone();
        state.current = Some(summary);

        Ok(RunGuard {
            tracker: self.clone(),
            run_id,
            kind,
            finished: false,
        })
    }

    /// The active run, or the last one to finish.
    pub fn snapshot(&self) -> Option<RunSummary> {
        self.lock().current.clone()
    }

    fn update(&self, run_id: &str, change: impl FnOnce(&mut RunSummary)) -> Option<RunSummary> {
        let mut state = self.lock();
        let run = state.current.as_mut().filter(|run| run.run_id == run_id)?;
        change(run);
        Some(run.clone())
    }
}

/// Exclusive handle on the active run. Dropping it unfinished marks the run failed.
#[derive(Debug)]
pub struct RunGuard {
    tracker: RunTracker,
    run_id: String,
    kind: RunKind,
    finished: bool,
}

impl RunGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn publish(&self, counters: RunCounters) {
        self.tracker.update(&self.run_id, |run| run.apply(counters));
    }

    /// Closes the run as `Completed` or `Degraded` depending on failures.
    pub fn finish(mut self, counters: RunCounters) -> RunSummary {
        let outcome = if counters.failed == 0 {
            RunOutcome::Completed
        } else {
            RunOutcome::Degraded
        };
        self.close(counters, outcome)
    }

    pub fn fail(mut self, counters: RunCounters, reason: impl Into<String>) -> RunSummary {
        self.close(counters, RunOutcome::Failed(reason.into()))
    }

    fn close(&mut self, counters: RunCounters, outcome: RunOutcome) -> RunSummary {
        self.finished = true;
        let run_id = self.run_id.clone();
        self.tracker
            .update(&run_id, |run| {
                run.apply(counters);
                run.outcome = outcome.clone();
                run.finished_at = Some(Utc::now());
            })
            .unwrap_or_else(|| {
                let mut orphan = RunSummary::started(self.kind);
                orphan.run_id = run_id;
                orphan.apply(counters);
                orphan.outcome = outcome;
                orphan.finished_at = Some(Utc::now());
                orphan
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.update(&self.run_id, |run| {
                run.outcome = RunOutcome::Failed("run aborted".to_string());
                run.finished_at = Some(Utc::now());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_conflicts_without_touching_counters() {
        let tracker = RunTracker::new();
        let guard = tracker.try_start(RunKind::Full).expect("slot is free");
        guard.publish(RunCounters {
            discovered: 7,
            succeeded: 3,
            ..RunCounters::default()
        });

        match tracker.try_start(RunKind::Incremental) {
            Err(IndexingError::Conflict { run_id }) => assert_eq!(run_id, guard.run_id()),
            other => panic!("expected conflict, got {other:?}"),
        }

        let snapshot = tracker.snapshot().expect("run is visible");
        assert_eq!(snapshot.discovered, 7);
        assert_eq!(snapshot.succeeded, 3);
        assert_eq!(snapshot.kind, RunKind::Full);
        assert!(snapshot.is_active());
    }

    #[test]
    fn outcome_follows_failure_count() {
        let tracker = RunTracker::new();
        let clean = tracker
            .try_start(RunKind::Full)
            .expect("slot is free")
            .finish(RunCounters {
                discovered: 2,
                succeeded: 2,
                failed: 0,
                indexed: 2,
            });
        assert_eq!(clean.outcome, RunOutcome::Completed);
        assert!(clean.finished_at.is_some());

        let partial = tracker
            .try_start(RunKind::Full)
            .expect("finished run frees the slot")
            .finish(RunCounters {
                discovered: 2,
                succeeded: 1,
                failed: 1,
                indexed: 1,
            });
        assert_eq!(partial.outcome, RunOutcome::Degraded);
        assert_eq!(tracker.snapshot(), Some(partial));
    }

    #[test]
    fn dropped_guard_marks_run_failed_and_frees_slot() {
        let tracker = RunTracker::new();
        drop(tracker.try_start(RunKind::Full).expect("slot is free"));

        let snapshot = tracker.snapshot().expect("run is visible");
        assert!(matches!(snapshot.outcome, RunOutcome::Failed(_)));
        assert!(tracker.try_start(RunKind::Full).is_ok());
    }

    #[test]
    fn explicit_failure_keeps_reason() {
        let tracker = RunTracker::new();
        let summary = tracker
            .try_start(RunKind::Incremental)
            .expect("slot is free")
            .fail(RunCounters::default(), "bucket unreachable");
        assert_eq!(
            summary.outcome,
            RunOutcome::Failed("bucket unreachable".to_string())
        );
    }
}
