//! Lifecycle contract between a test runner and its reporters.
//!
//! Runners call the [`TestRunReporter`] hooks synchronously as a run
//! progresses. Hosts that receive events out of process can decode them as
//! [`RunEvent`] values and forward them with [`dispatch_run_event`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Runner-level metadata delivered at start and end of a run.
pub struct RunnerStats {
    #[serde(default)]
    pub cid: String,
    /// Test framework name, e.g. `mocha` or `cucumber`.
    #[serde(default)]
    pub framework: Option<String>,
    /// Resolved capabilities. Multiremote runs map driver names to
    /// capability objects.
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub multiremote: bool,
    /// Elapsed run time. Only meaningful at runner end.
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunnerStats {
    pub fn is_cucumber(&self) -> bool {
        self.framework
            .as_deref()
            .map(|framework| framework.trim().eq_ignore_ascii_case("cucumber"))
            .unwrap_or(false)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteKind {
    #[default]
    Suite,
    Feature,
    Scenario,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteStats {
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub kind: SuiteKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Stack when the runner captured one, otherwise the bare message.
    pub fn stack_or_message(&self) -> &str {
        self.stack
            .as_deref()
            .filter(|stack| !stack.trim().is_empty())
            .unwrap_or(&self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestStats {
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub full_title: Option<String>,
    /// Title of the enclosing suite.
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub errors: Vec<TestError>,
}

impl TestStats {
    /// Title used in notifications, falling back to the full title.
    pub fn display_title(&self) -> &str {
        if !self.title.trim().is_empty() {
            return &self.title;
        }
        self.full_title
            .as_deref()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(&self.uid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookStats {
    pub uid: String,
    pub title: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub error: Option<TestError>,
}

/// Receiver side of the runner lifecycle. Every hook defaults to a no-op so
/// reporters only implement what they consume.
pub trait TestRunReporter {
    fn on_runner_start(&mut self, _runner: &RunnerStats) -> Result<()> {
        Ok(())
    }

    fn on_suite_start(&mut self, _suite: &SuiteStats) -> Result<()> {
        Ok(())
    }

    fn on_hook_end(&mut self, _hook: &HookStats) -> Result<()> {
        Ok(())
    }

    fn on_test_pass(&mut self, _test: &TestStats) -> Result<()> {
        Ok(())
    }

    fn on_test_fail(&mut self, _test: &TestStats) -> Result<()> {
        Ok(())
    }

    fn on_test_skip(&mut self, _test: &TestStats) -> Result<()> {
        Ok(())
    }

    fn on_test_pending(&mut self, _test: &TestStats) -> Result<()> {
        Ok(())
    }

    fn on_suite_end(&mut self, _suite: &SuiteStats) -> Result<()> {
        Ok(())
    }

    fn on_runner_end(&mut self, _runner: &RunnerStats) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "stats", rename_all = "snake_case")]
/// Serialized form of one lifecycle callback.
pub enum RunEvent {
    RunnerStart(RunnerStats),
    SuiteStart(SuiteStats),
    HookEnd(HookStats),
    TestPass(TestStats),
    TestFail(TestStats),
    TestSkip(TestStats),
    TestPending(TestStats),
    SuiteEnd(SuiteStats),
    RunnerEnd(RunnerStats),
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunnerStart(_) => "runner:start",
            Self::SuiteStart(_) => "suite:start",
            Self::HookEnd(_) => "hook:end",
            Self::TestPass(_) => "test:pass",
            Self::TestFail(_) => "test:fail",
            Self::TestSkip(_) => "test:skip",
            Self::TestPending(_) => "test:pending",
            Self::SuiteEnd(_) => "suite:end",
            Self::RunnerEnd(_) => "runner:end",
        }
    }
}

pub fn dispatch_run_event<R>(reporter: &mut R, event: &RunEvent) -> Result<()>
where
    R: TestRunReporter + ?Sized,
{
    match event {
        RunEvent::RunnerStart(stats) => reporter.on_runner_start(stats),
        RunEvent::SuiteStart(stats) => reporter.on_suite_start(stats),
        RunEvent::HookEnd(stats) => reporter.on_hook_end(stats),
        RunEvent::TestPass(stats) => reporter.on_test_pass(stats),
        RunEvent::TestFail(stats) => reporter.on_test_fail(stats),
        RunEvent::TestSkip(stats) => reporter.on_test_skip(stats),
        RunEvent::TestPending(stats) => reporter.on_test_pending(stats),
        RunEvent::SuiteEnd(stats) => reporter.on_suite_end(stats),
        RunEvent::RunnerEnd(stats) => reporter.on_runner_end(stats),
    }
}
