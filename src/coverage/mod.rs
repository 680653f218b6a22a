//! Session coverage accounting.
//!
//! The ledger keeps two views over the method and branch identifiers
//! reported by the device:
//!
//! - a cumulative view that only ever grows during a session, and
//! - a window view holding everything reported since the decision policy
//!   was last informed. The controller reads the window, reports it, then
//!   calls [`CoverageLedger::reset_window`].
//!
//! Every identifier inserted into the window is also inserted into the
//! cumulative view, so the window is always a subset of it.

use serde::Serialize;
use std::collections::BTreeSet;


pub type MethodId = u32;
pub type BranchId = u32;

/// Coverage gained since the last report to the decision policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageWindow {
    pub methods: BTreeSet<MethodId>,
    pub branches: BTreeSet<BranchId>,
}

impl CoverageWindow {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.branches.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CoverageLedger {
    covered_methods: BTreeSet<MethodId>,
    covered_branches: BTreeSet<BranchId>,
    window: CoverageWindow,
    latest_methods: BTreeSet<MethodId>,
    latest_branches: BTreeSet<BranchId>,
}

impl CoverageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record identifiers reported by one snapshot.
    ///
    /// Repeated identifiers are absorbed by set semantics. The identifiers
    /// that were not covered before this call become the latest delta.
    pub fn add<M, B>(&mut self, methods: M, branches: B)
    where
        M: IntoIterator<Item = MethodId>,
        B: IntoIterator<Item = BranchId>,
    {
        self.latest_methods.clear();
        self.latest_branches.clear();

        for id in methods {
            if self.covered_methods.insert(id) {
                self.latest_methods.insert(id);
            }
            self.window.methods.insert(id);
        }

        for id in branches {
            if self.covered_branches.insert(id) {
                self.latest_branches.insert(id);
            }
            self.window.branches.insert(id);
        }
    }

    pub fn has_method_delta(&self) -> bool {
        !self.window.methods.is_empty()
    }

    pub fn has_branch_delta(&self) -> bool {
        !self.window.branches.is_empty()
    }

    pub fn window_methods(&self) -> &BTreeSet<MethodId> {
        &self.window.methods
    }

    pub fn window_branches(&self) -> &BTreeSet<BranchId> {
        &self.window.branches
    }

    /// Borrow the current window without clearing it.
    pub fn window(&self) -> &CoverageWindow {
        &self.window
    }

    pub fn reset_window(&mut self) {
        self.window.methods.clear();
        self.window.branches.clear();
    }

    /// Methods first covered by the most recent [`add`](Self::add).
    pub fn latest_method_delta(&self) -> &BTreeSet<MethodId> {
        &self.latest_methods
    }

    /// Branches first covered by the most recent [`add`](Self::add).
    pub fn latest_branch_delta(&self) -> &BTreeSet<BranchId> {
        &self.latest_branches
    }

    pub fn method_coverage_count(&self) -> usize {
        self.covered_methods.len()
    }

    pub fn branch_coverage_count(&self) -> usize {
        self.covered_branches.len()
    }

    /// Methods plus branches; grows whenever either cumulative set grows.
    pub fn combined_coverage_metric(&self) -> usize {
        self.covered_methods.len() + self.covered_branches.len()
    }

    pub fn covered_methods(&self) -> &BTreeSet<MethodId> {
        &self.covered_methods
    }

    pub fn covered_branches(&self) -> &BTreeSet<BranchId> {
        &self.covered_branches
    }
}

/// Render identifiers the way the metrics history stores deltas: `1,5,9`.
pub fn join_ids(ids: &BTreeSet<u32>) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
