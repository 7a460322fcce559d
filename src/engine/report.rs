// src/engine/report.rs

//! Pass summaries and their terminal rendering.

use std::fmt::Write as _;

use crate::dag::{Eligibility, PairKey, Plan};

/// Counters for one pass (or several merged passes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Pairs the driver moved to `completed`.
    pub completed: usize,
    /// Pairs already done when planned (including post-conditions observed
    /// during planning).
    pub already_done: usize,
    /// Pairs handed to the backend and accepted.
    pub submitted: usize,
    pub blocked: usize,
    pub waiting: usize,
    pub conflicting: usize,
    /// Pairs that entered `error` during the pass.
    pub errored: usize,
    /// Pairs sitting in `error` from an earlier pass.
    pub failed: usize,
    /// Claimed pairs put back to `pending` (rejected or failed submission).
    pub reverted: usize,
}

/// A pair that entered `error` during the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairFailure {
    pub key: PairKey,
    /// First line of the failure detail.
    pub summary: String,
    pub detail: String,
}

impl PairFailure {
    pub fn new(key: PairKey, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let summary = detail.lines().next().unwrap_or_default().to_string();
        Self {
            key,
            summary,
            detail,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub summary: PassSummary,
    pub failures: Vec<PairFailure>,
    /// Pairs the planner emitted, in plan order.
    pub planned: Vec<PairKey>,
    pub dry_run: bool,
    pub passes: usize,
}

impl PassReport {
    /// Fold the planner's decisions into the counters.
    pub(crate) fn absorb_plan(&mut self, plan: &Plan) {
        let s = plan.summary();
        self.summary.already_done = s.already_done;
        self.summary.blocked = s.blocked;
        self.summary.waiting = s.waiting;
        self.summary.conflicting = s.conflicting;
        self.summary.failed = s.failed;
        self.summary.errored += s.errored;

        for decision in &plan.decisions {
            if let Eligibility::Errored(message) = &decision.eligibility {
                self.failures
                    .push(PairFailure::new(decision.key.clone(), message.clone()));
            }
        }
        self.planned = plan.units.iter().map(|u| u.key()).collect();
    }

    pub(crate) fn record_failure(&mut self, key: PairKey, detail: impl Into<String>) {
        self.summary.errored += 1;
        self.failures.push(PairFailure::new(key, detail));
    }

    /// Combine with a later pass: work counters add up, planner counters
    /// describe the latest pass.
    pub fn merge(&mut self, later: PassReport) {
        let s = &mut self.summary;
        let l = later.summary;
        s.completed += l.completed;
        s.submitted += l.submitted;
        s.errored += l.errored;
        s.reverted += l.reverted;
        s.already_done = l.already_done;
        s.blocked = l.blocked;
        s.waiting = l.waiting;
        s.conflicting = l.conflicting;
        s.failed = l.failed;

        self.failures.extend(later.failures);
        self.planned.extend(later.planned);
        self.dry_run |= later.dry_run;
        self.passes += later.passes;
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errored > 0
    }

    /// 0 for a clean pass, 1 when a pair entered `error`.
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() { 1 } else { 0 }
    }

    /// Human-readable report. `debug` prints full failure detail instead of
    /// one line per failure.
    pub fn render(&self, debug: bool) -> String {
        let mut out = String::new();

        if self.dry_run {
            if self.planned.is_empty() {
                out.push_str("nothing to run\n");
            }
            for key in &self.planned {
                let _ = writeln!(out, "would run {key}");
            }
        }

        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} submitted, {} completed, {} done, {} blocked, {} waiting, {} conflicting, {} errored, {} failed, {} reverted",
            s.submitted,
            s.completed,
            s.already_done,
            s.blocked,
            s.waiting,
            s.conflicting,
            s.errored,
            s.failed,
            s.reverted,
        );

        for failure in &self.failures {
            if debug {
                let _ = writeln!(out, "error {}:", failure.key);
                for line in failure.detail.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            } else {
                let _ = writeln!(out, "error {}: {}", failure.key, failure.summary);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_render_compact_or_full() {
        let mut report = PassReport::default();
        report.record_failure(PairKey::new("j1", "simulate"), "exited with code 2\nsegfault");

        let compact = report.render(false);
        assert!(compact.contains("error j1/simulate: exited with code 2\n"));
        assert!(!compact.contains("segfault"));

        let full = report.render(true);
        assert!(full.contains("    segfault\n"));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn merge_adds_work_and_keeps_latest_plan_counts() {
        let mut first = PassReport::default();
        first.summary.submitted = 2;
        first.summary.blocked = 3;
        first.passes = 1;
        let mut second = PassReport::default();
        second.summary.submitted = 1;
        second.summary.completed = 1;
        second.summary.blocked = 0;
        second.passes = 1;

        first.merge(second);
        assert_eq!(first.summary.submitted, 3);
        assert_eq!(first.summary.completed, 1);
        assert_eq!(first.summary.blocked, 0);
        assert_eq!(first.passes, 2);
        assert_eq!(first.exit_code(), 0);
    }
}
