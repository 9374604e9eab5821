//! Slack notifications for test runs.
//!
//! [`SlackReporter`] listens to a test runner's lifecycle and posts a start
//! banner, failure alerts (with optional screenshots), an end-of-run summary
//! and a per-suite breakdown to Slack. Deliveries go through an ordered
//! single-consumer queue so the host can wait for every notification to be
//! flushed before the process exits.

pub mod capability_render;
pub mod delivery_queue;
pub mod message_builders;
pub mod reporter_config;
pub mod run_events;
pub mod run_state;
pub mod slack_api_client;
mod slack_http_helpers;
pub mod slack_payloads;
pub mod slack_reporter;
pub mod slack_webhook_client;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use delivery_queue::{
    DeliveryError, DeliveryQueue, DeliveryResult, DeliveryStats, DeliveryTask,
    DeliveryWorkerHandle, ThreadAnchor, TickOutcome,
};
pub use message_builders::{
    DefaultNotificationBuilder, FailedCase, NotificationBuilder, RenderContext,
};
pub use reporter_config::{
    ChannelSettings, EmojiOverrides, EmojiSymbols, ReporterConfigError, ReporterSettings,
    SlackReporterConfig, SlackTransportConfig, TransportSettings, WebApiOptions, WebhookOptions,
    WebhookSettings,
};
pub use run_events::{
    dispatch_run_event, HookStats, RunEvent, RunnerStats, SuiteKind, SuiteStats, TestError,
    TestRunReporter, TestStats,
};
pub use run_state::{DetailSection, ReportingUnit, ResultState, RunState, StateCounts};
pub use slack_api_client::SlackApiClient;
pub use slack_payloads::{FileUpload, OutboundMessage, ThreadPlacement, WebhookIdentity};
pub use slack_reporter::{SlackReporter, SlackReporterHandle};
pub use slack_webhook_client::SlackWebhookClient;
pub use transport::{
    DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport, PostedMessage, UploadedFile,
};
