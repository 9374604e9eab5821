//! Accumulated state of one test run.
//!
//! Counters feed the summary message; the ordered suite records feed the
//! detailed breakdown. Suites are kept in first-encountered order, and each
//! suite keeps its tests and hooks in the order the runner reported them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::run_events::{HookStats, SuiteKind, SuiteStats, TestStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    Passed,
    Failed,
    Skipped,
    Pending,
}

impl ResultState {
    pub const ALL: [ResultState; 4] = [
        ResultState::Passed,
        ResultState::Failed,
        ResultState::Pending,
        ResultState::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StateCounts {
    pub fn total(&self) -> u64 {
        self.passed
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What one line of the detailed breakdown stands for.
pub enum ReportingUnit {
    /// Every test is a line, filtered by its own state.
    Test,
    /// Every Cucumber scenario is a unit; its aggregate state decides
    /// whether the scenario and all of its steps are shown.
    Scenario,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Display-only pointer to the most recently started suite.
pub struct SuiteRef {
    pub uid: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Test,
    Hook,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteEntry {
    pub kind: EntryKind,
    pub uid: String,
    pub title: String,
    /// `None` for hooks that finished without error.
    pub state: Option<ResultState>,
}

impl SuiteEntry {
    /// Tests are always reported; hooks only when they errored.
    fn is_reportable(&self) -> bool {
        match self.kind {
            EntryKind::Test => true,
            EntryKind::Hook => self.state == Some(ResultState::Failed),
        }
    }
}

#[derive(Debug, Clone)]
struct SuiteRecord {
    stats: SuiteStats,
    depth: usize,
    entries: Vec<SuiteEntry>,
    child_suites: usize,
}

impl SuiteRecord {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.child_suites == 0
    }

    fn test_states(&self) -> impl Iterator<Item = ResultState> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Test)
            .filter_map(|entry| entry.state)
    }

    /// Failed if any step failed, skipped if every step was skipped (a
    /// scenario without steps counts as skipped), otherwise passed.
    fn scenario_state(&self) -> ResultState {
        let mut all_skipped = true;
        for state in self.test_states() {
            if state == ResultState::Failed {
                return ResultState::Failed;
            }
            if state != ResultState::Skipped {
                all_skipped = false;
            }
        }
        if all_skipped {
            ResultState::Skipped
        } else {
            ResultState::Passed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One suite's slice of the detailed breakdown.
pub struct DetailSection {
    pub uid: String,
    pub title: String,
    pub depth: usize,
    pub description: Option<String>,
    pub entries: Vec<SuiteEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    counts: StateCounts,
    suite_order: Vec<String>,
    suites: HashMap<String, SuiteRecord>,
    open_suites: Vec<String>,
    current_suite: Option<SuiteRef>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> StateCounts {
        self.counts
    }

    pub fn current_suite(&self) -> Option<&SuiteRef> {
        self.current_suite.as_ref()
    }

    /// Suite uids in first-encountered order.
    pub fn suite_uids(&self) -> impl Iterator<Item = &str> {
        self.suite_order.iter().map(String::as_str)
    }

    pub fn suite_depth(&self, uid: &str) -> Option<usize> {
        self.suites.get(uid).map(|record| record.depth)
    }

    pub fn start_suite(&mut self, suite: &SuiteStats) {
        let parent_uid = suite
            .parent_uid
            .as_deref()
            .filter(|uid| self.suites.contains_key(*uid))
            .map(ToOwned::to_owned)
            .or_else(|| self.open_suites.last().cloned());
        let depth = match (suite.kind, parent_uid.as_deref()) {
            (SuiteKind::Feature, _) | (_, None) => 0,
            (_, Some(parent)) => self
                .suites
                .get(parent)
                .map(|record| record.depth.saturating_add(1))
                .unwrap_or(0),
        };
        if let Some(parent) = parent_uid.as_deref().and_then(|uid| self.suites.get_mut(uid)) {
            parent.child_suites = parent.child_suites.saturating_add(1);
        }

        // A repeated uid reopens the existing suite and keeps its entries.
        if !self.suites.contains_key(&suite.uid) {
            self.suite_order.push(suite.uid.clone());
        }
        self.suites
            .entry(suite.uid.clone())
            .or_insert_with(|| SuiteRecord {
                stats: suite.clone(),
                depth,
                entries: Vec::new(),
                child_suites: 0,
            });
        self.open_suites.push(suite.uid.clone());
        self.current_suite = Some(SuiteRef {
            uid: suite.uid.clone(),
            title: suite.title.clone(),
        });
    }

    pub fn end_suite(&mut self, suite: &SuiteStats) {
        match self.open_suites.iter().rposition(|uid| uid == &suite.uid) {
            Some(index) => {
                self.open_suites.truncate(index);
            }
            None => {
                self.open_suites.pop();
            }
        }
    }

    /// Records a test result and bumps the matching counter. Pending tests
    /// count as skipped.
    pub fn record_test(&mut self, test: &TestStats, state: ResultState) {
        match state {
            ResultState::Passed => self.counts.passed = self.counts.passed.saturating_add(1),
            ResultState::Failed => self.counts.failed = self.counts.failed.saturating_add(1),
            ResultState::Skipped | ResultState::Pending => {
                self.counts.skipped = self.counts.skipped.saturating_add(1)
            }
        }
        self.push_entry(
            test.parent_uid.as_deref(),
            SuiteEntry {
                kind: EntryKind::Test,
                uid: test.uid.clone(),
                title: test.display_title().to_string(),
                state: Some(state),
            },
        );
    }

    /// Records a finished hook. An errored hook counts as a failure.
    pub fn record_hook(&mut self, hook: &HookStats) {
        let state = hook.error.as_ref().map(|_| ResultState::Failed);
        if state.is_some() {
            self.counts.failed = self.counts.failed.saturating_add(1);
        }
        self.push_entry(
            hook.parent_uid.as_deref(),
            SuiteEntry {
                kind: EntryKind::Hook,
                uid: hook.uid.clone(),
                title: hook.title.clone(),
                state,
            },
        );
    }

    fn push_entry(&mut self, parent_uid: Option<&str>, entry: SuiteEntry) {
        let target = parent_uid
            .filter(|uid| self.suites.contains_key(*uid))
            .map(ToOwned::to_owned)
            .or_else(|| self.open_suites.last().cloned());
        match target.and_then(|uid| self.suites.get_mut(&uid)) {
            Some(record) => record.entries.push(entry),
            None => tracing::debug!(
                entry_uid = entry.uid.as_str(),
                "result recorded outside of any suite; omitted from detail breakdown"
            ),
        }
    }

    /// Counts Cucumber scenarios instead of steps.
    pub fn scenario_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in self.ordered_records() {
            if record.stats.kind != SuiteKind::Scenario {
                continue;
            }
            match record.scenario_state() {
                ResultState::Passed => counts.passed = counts.passed.saturating_add(1),
                ResultState::Failed => counts.failed = counts.failed.saturating_add(1),
                ResultState::Skipped | ResultState::Pending => {
                    counts.skipped = counts.skipped.saturating_add(1)
                }
            }
        }
        counts
    }

    fn ordered_records(&self) -> impl Iterator<Item = &SuiteRecord> {
        self.suite_order
            .iter()
            .filter_map(|uid| self.suites.get(uid))
    }

    /// Builds the detailed breakdown. An empty `filter` admits every state.
    pub fn detail_sections(&self, filter: &[ResultState], unit: ReportingUnit) -> Vec<DetailSection> {
        let admits = |state: ResultState| filter.is_empty() || filter.contains(&state);
        let mut sections = Vec::new();
        for record in self.ordered_records() {
            if record.is_empty() {
                continue;
            }
            let entries = match unit {
                ReportingUnit::Test => record
                    .entries
                    .iter()
                    .filter(|entry| entry.is_reportable())
                    .filter(|entry| entry.state.map(admits).unwrap_or(false))
                    .cloned()
                    .collect::<Vec<_>>(),
                ReportingUnit::Scenario => {
                    if record.stats.kind != SuiteKind::Scenario || !admits(record.scenario_state())
                    {
                        continue;
                    }
                    record
                        .entries
                        .iter()
                        .filter(|entry| entry.is_reportable())
                        .cloned()
                        .collect::<Vec<_>>()
                }
            };
            if entries.is_empty() {
                continue;
            }
            sections.push(DetailSection {
                uid: record.stats.uid.clone(),
                title: record.stats.title.clone(),
                depth: record.depth,
                description: record
                    .stats
                    .description
                    .clone()
                    .filter(|description| !description.trim().is_empty()),
                entries,
            });
        }
        sections
    }
}
