//! Lifecycle adapter: turns runner callbacks into Slack notifications.
//!
//! Callbacks never await. They update [`RunState`], ask the configured
//! [`NotificationBuilder`] for payloads and enqueue them on the
//! [`DeliveryQueue`]. Hosts call [`SlackReporter::flush`] (or poll
//! [`SlackReporter::is_synchronised`]) before exiting so no notification is
//! lost.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;

use crate::delivery_queue::{
    DeliveryQueue, DeliveryResult, DeliveryWorkerHandle, ThreadAnchor, TickOutcome,
};
use crate::message_builders::{
    DefaultNotificationBuilder, FailedCase, NotificationBuilder, RenderContext,
};
use crate::reporter_config::{ReporterSettings, SlackReporterConfig, TransportSettings};
use crate::run_events::{HookStats, RunnerStats, SuiteStats, TestRunReporter, TestStats};
use crate::run_state::{ReportingUnit, ResultState, RunState, StateCounts};
use crate::slack_api_client::SlackApiClient;
use crate::slack_payloads::{FileUpload, OutboundMessage};
use crate::slack_webhook_client::SlackWebhookClient;
use crate::transport::{DeliveryRequest, DeliveryTransport};

/// State shared between the reporter and its out-of-band handles.
struct ReporterShared {
    pending_screenshot: Mutex<Option<Vec<u8>>>,
    results_url: Mutex<Option<String>>,
    accepts_screenshots: bool,
    uses_channel_transport: bool,
}

impl ReporterShared {
    fn take_screenshot(&self) -> Option<Vec<u8>> {
        self.pending_screenshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn results_url(&self) -> Option<String> {
        self.results_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct SlackReporter {
    settings: ReporterSettings,
    builder: Arc<dyn NotificationBuilder>,
    state: RunState,
    queue: Arc<DeliveryQueue>,
    shared: Arc<ReporterShared>,
    worker: Option<DeliveryWorkerHandle>,
    is_cucumber: bool,
    runner_ended: bool,
}

impl SlackReporter {
    /// Validates `config`, creates the matching Slack client and starts the
    /// delivery worker. Configuration failures carry a
    /// [`crate::ReporterConfigError`].
    pub fn new(config: &SlackReporterConfig) -> Result<Self> {
        let settings = ReporterSettings::from_config(config)?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: ReporterSettings) -> Result<Self> {
        let transport: Arc<dyn DeliveryTransport> = match &settings.transport {
            TransportSettings::Channel(channel) => Arc::new(SlackApiClient::new(
                channel,
                settings.request_timeout_ms,
                settings.retry_max_attempts,
                settings.retry_base_delay_ms,
            )?),
            TransportSettings::Webhook(webhook) => Arc::new(SlackWebhookClient::new(
                webhook,
                settings.request_timeout_ms,
                settings.retry_max_attempts,
                settings.retry_base_delay_ms,
            )?),
        };
        let mut reporter = Self::with_transport(settings, transport);
        reporter.start_delivery_worker()?;
        Ok(reporter)
    }

    /// Builds a reporter over an existing transport. No worker is started;
    /// call [`Self::start_delivery_worker`] or drive delivery with
    /// [`Self::flush`].
    pub fn with_transport(settings: ReporterSettings, transport: Arc<dyn DeliveryTransport>) -> Self {
        let shared = Arc::new(ReporterShared {
            pending_screenshot: Mutex::new(None),
            results_url: Mutex::new(settings.results_url.clone()),
            accepts_screenshots: settings.accepts_screenshots(),
            uses_channel_transport: settings.uses_channel_transport(),
        });
        Self {
            builder: Arc::new(DefaultNotificationBuilder),
            state: RunState::new(),
            queue: Arc::new(DeliveryQueue::new(transport)),
            shared,
            worker: None,
            is_cucumber: false,
            runner_ended: false,
            settings,
        }
    }

    pub fn with_builder<B>(mut self, builder: B) -> Self
    where
        B: NotificationBuilder + 'static,
    {
        tracing::info!("slack notification builder has been overridden");
        self.builder = Arc::new(builder);
        self
    }

    pub fn start_delivery_worker(&mut self) -> Result<()> {
        if self.worker.is_none() {
            self.worker = Some(self.queue.spawn_worker(self.settings.poll_interval)?);
        }
        Ok(())
    }

    pub fn handle(&self) -> SlackReporterHandle {
        SlackReporterHandle {
            queue: self.queue.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn settings(&self) -> &ReporterSettings {
        &self.settings
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    pub fn counts(&self) -> StateCounts {
        self.state.counts()
    }

    pub fn is_synchronised(&self) -> bool {
        self.queue.is_synchronised()
    }

    pub fn is_ended(&self) -> bool {
        self.queue.is_ended()
    }

    pub fn thread_anchor(&self) -> ThreadAnchor {
        self.queue.thread_anchor()
    }

    /// Delivers everything queued so far. After the runner has ended this
    /// also waits for the queue to end.
    pub async fn flush(&self) {
        let backoff = self.settings.poll_interval.min(Duration::from_millis(10));
        loop {
            match self.queue.tick().await {
                TickOutcome::Ended => return,
                TickOutcome::Drained { .. } => continue,
                TickOutcome::Idle if !self.runner_ended && self.queue.is_synchronised() => return,
                TickOutcome::Idle | TickOutcome::Busy => tokio::time::sleep(backoff).await,
            }
        }
    }

    pub async fn flush_with_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.flush())
            .await
            .map_err(|_| anyhow!("slack notifications were not flushed within {timeout:?}"))
    }

    fn render<T>(&self, render: impl FnOnce(&RenderContext<'_>) -> Result<T>) -> Result<T> {
        let results_url = self.shared.results_url();
        let ctx = RenderContext {
            symbols: &self.settings.symbols,
            title: self.settings.title.as_deref(),
            results_url: results_url.as_deref(),
            channel: self.settings.channel().map(|channel| channel.channel.as_str()),
            detail_filter: self.settings.detail_filter(),
            current_suite: self.state.current_suite(),
        };
        render(&ctx)
    }

    fn enqueue_message(&self, message: OutboundMessage) -> u64 {
        let request = if self.shared.uses_channel_transport {
            DeliveryRequest::PostMessage(message)
        } else {
            DeliveryRequest::WebhookSend(message)
        };
        self.queue.enqueue(request)
    }

    fn notify_failure(&self, case: FailedCase<'_>) -> Result<()> {
        if !self.settings.notify_failed_case {
            return Ok(());
        }
        let message = self.render(|ctx| self.builder.failure_message(ctx, case))?;
        self.enqueue_message(message);
        Ok(())
    }

    fn summary_counts(&self) -> StateCounts {
        if !self.settings.use_scenario_based_state_counts {
            return self.state.counts();
        }
        if self.is_cucumber {
            return self.state.scenario_counts();
        }
        tracing::warn!(
            "cucumber framework is not in use; counting states per test instead of per scenario"
        );
        self.state.counts()
    }
}

impl TestRunReporter for SlackReporter {
    fn on_runner_start(&mut self, runner: &RunnerStats) -> Result<()> {
        self.is_cucumber = runner.is_cucumber();
        tracing::info!(
            framework = runner.framework.as_deref().unwrap_or("unknown"),
            cid = runner.cid.as_str(),
            "test runner started"
        );
        if !self.settings.notify_test_start_message {
            return Ok(());
        }
        let message = self
            .render(|ctx| self.builder.start_message(ctx, runner))
            .context("failed to build slack start message")?;
        self.enqueue_message(message);
        Ok(())
    }

    fn on_suite_start(&mut self, suite: &SuiteStats) -> Result<()> {
        self.state.start_suite(suite);
        Ok(())
    }

    fn on_hook_end(&mut self, hook: &HookStats) -> Result<()> {
        self.state.record_hook(hook);
        if hook.error.is_none() {
            return Ok(());
        }
        self.notify_failure(FailedCase::Hook(hook))
            .context("failed to build slack hook failure message")
    }

    fn on_test_pass(&mut self, test: &TestStats) -> Result<()> {
        self.state.record_test(test, ResultState::Passed);
        Ok(())
    }

    fn on_test_fail(&mut self, test: &TestStats) -> Result<()> {
        self.state.record_test(test, ResultState::Failed);
        self.notify_failure(FailedCase::Test(test))
            .context("failed to build slack test failure message")?;

        if !self.shared.accepts_screenshots {
            return Ok(());
        }
        let Some(bytes) = self.shared.take_screenshot() else {
            return Ok(());
        };
        let upload = self
            .render(|ctx| self.builder.screenshot_upload(ctx, test, bytes))
            .context("failed to build slack screenshot upload")?;
        self.queue.enqueue(DeliveryRequest::UploadFile(upload));
        Ok(())
    }

    fn on_test_skip(&mut self, test: &TestStats) -> Result<()> {
        self.state.record_test(test, ResultState::Skipped);
        Ok(())
    }

    fn on_test_pending(&mut self, test: &TestStats) -> Result<()> {
        self.state.record_test(test, ResultState::Pending);
        Ok(())
    }

    fn on_suite_end(&mut self, suite: &SuiteStats) -> Result<()> {
        self.state.end_suite(suite);
        Ok(())
    }

    fn on_runner_end(&mut self, runner: &RunnerStats) -> Result<()> {
        if self.runner_ended {
            tracing::warn!("runner end received more than once; ignoring");
            return Ok(());
        }
        if self.settings.notify_test_finish_message {
            let counts = self.summary_counts();
            let summary = self
                .render(|ctx| self.builder.result_message(ctx, runner, &counts))
                .context("failed to build slack result message")?;
            let detail = if self.settings.notifies_detail_results() {
                let unit = if self.is_cucumber {
                    ReportingUnit::Scenario
                } else {
                    ReportingUnit::Test
                };
                let sections = self
                    .state
                    .detail_sections(self.settings.detail_filter(), unit);
                Some(
                    self.render(|ctx| {
                        self.builder
                            .result_detail_message(ctx, runner, &counts, &sections)
                    })
                    .context("failed to build slack result detail message")?,
                )
            } else {
                None
            };
            self.enqueue_message(summary);
            if let Some(detail) = detail {
                self.enqueue_message(detail);
            }
        }

        if self.shared.take_screenshot().is_some() {
            tracing::warn!("dropping screenshot that was never matched to a failed test");
        }
        self.runner_ended = true;
        self.queue.stop();
        Ok(())
    }
}

#[derive(Clone)]
/// Out-of-band access to a running reporter, e.g. from test code.
pub struct SlackReporterHandle {
    queue: Arc<DeliveryQueue>,
    shared: Arc<ReporterShared>,
}

impl SlackReporterHandle {
    pub async fn post_message(&self, message: OutboundMessage) -> DeliveryResult {
        self.queue
            .request(DeliveryRequest::PostMessage(message))
            .await
    }

    pub async fn upload_file(&self, upload: FileUpload) -> DeliveryResult {
        self.queue.request(DeliveryRequest::UploadFile(upload)).await
    }

    pub async fn send_webhook(&self, message: OutboundMessage) -> DeliveryResult {
        self.queue
            .request(DeliveryRequest::WebhookSend(message))
            .await
    }

    /// Stores a screenshot for the next failed test. Returns `false` when
    /// screenshots cannot be posted with the current configuration.
    pub fn submit_screenshot(&self, bytes: Vec<u8>) -> bool {
        if !self.shared.uses_channel_transport {
            tracing::warn!("screenshot ignored: uploads require the slack web api transport");
            return false;
        }
        if !self.shared.accepts_screenshots {
            tracing::warn!(
                "screenshot ignored: `notify_failed_case` and `upload_screenshot_of_failed_case` must both be enabled"
            );
            return false;
        }
        let mut slot = self
            .shared
            .pending_screenshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.replace(bytes).is_some() {
            tracing::debug!("replacing unclaimed screenshot with a newer one");
        }
        true
    }

    pub fn submit_screenshot_base64(&self, encoded: &str) -> Result<bool> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("screenshot is not valid base64")?;
        Ok(self.submit_screenshot(bytes))
    }

    pub fn has_pending_screenshot(&self) -> bool {
        self.shared
            .pending_screenshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn set_results_url(&self, url: Option<String>) {
        let url = url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        *self
            .shared
            .results_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = url;
    }

    pub fn results_url(&self) -> Option<String> {
        self.shared.results_url()
    }

    pub fn is_synchronised(&self) -> bool {
        self.queue.is_synchronised()
    }

    pub fn is_ended(&self) -> bool {
        self.queue.is_ended()
    }

    pub async fn wait_until_ended(&self) {
        self.queue.wait_until_ended().await;
    }
}
