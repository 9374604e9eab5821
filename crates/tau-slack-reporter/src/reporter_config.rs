//! Reporter configuration as written by users, and its validated form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run_state::ResultState;
use crate::slack_payloads::WebhookIdentity;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_WEBHOOK_USERNAME: &str = "Tau Test Reporter";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_UPLOAD_POLL_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_COLOR: &str = "#D3D3D3";
pub const FAILED_COLOR: &str = "#E51670";
pub const FINISHED_COLOR: &str = "#4366C7";

#[derive(Debug, Error)]
pub enum ReporterConfigError {
    #[error("web-api transport requires a non-empty `token`")]
    MissingToken,
    #[error("web-api transport requires a non-empty `channel`")]
    MissingChannel,
    #[error("webhook transport requires a non-empty `webhook` url")]
    MissingWebhookUrl,
    #[error("invalid webhook url `{url}`: {reason}")]
    InvalidWebhookUrl { url: String, reason: String },
    #[error("`poll_interval_ms` must be greater than zero")]
    InvalidPollInterval,
    #[error("failed to parse reporter config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read reporter config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    DEFAULT_SLACK_API_BASE.to_string()
}

fn default_detail_filter() -> Vec<ResultState> {
    ResultState::ALL.to_vec()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_retry_max_attempts() -> usize {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_upload_timeout_ms() -> u64 {
    DEFAULT_UPLOAD_TIMEOUT_MS
}

fn default_upload_poll_interval_ms() -> u64 {
    DEFAULT_UPLOAD_POLL_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebApiOptions {
    #[serde(default)]
    pub token: Option<String>,
    /// Deprecated alias of `token`.
    #[serde(default)]
    pub slack_bot_token: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_true")]
    pub upload_screenshot_of_failed_case: bool,
    #[serde(default = "default_true")]
    pub notify_detail_result_thread: bool,
    #[serde(default = "default_detail_filter")]
    pub filter_for_detail_results: Vec<ResultState>,
    #[serde(default = "default_true")]
    pub wait_for_upload: bool,
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
    #[serde(default = "default_upload_poll_interval_ms")]
    pub upload_poll_interval_ms: u64,
}

impl WebApiOptions {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            slack_bot_token: None,
            channel: channel.into(),
            api_base: default_api_base(),
            upload_screenshot_of_failed_case: true,
            notify_detail_result_thread: true,
            filter_for_detail_results: default_detail_filter(),
            wait_for_upload: true,
            upload_timeout_ms: DEFAULT_UPLOAD_TIMEOUT_MS,
            upload_poll_interval_ms: DEFAULT_UPLOAD_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookOptions {
    pub webhook: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub icon_emoji: Option<String>,
    /// Deprecated alias of `username`.
    #[serde(default)]
    pub slack_name: Option<String>,
    /// Deprecated alias of `icon_url`.
    #[serde(default)]
    pub slack_icon_url: Option<String>,
}

impl WebhookOptions {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SlackTransportConfig {
    WebApi(WebApiOptions),
    Webhook(WebhookOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Per-symbol emoji overrides. Unset or empty entries keep the default.
pub struct EmojiOverrides {
    #[serde(default)]
    pub passed: Option<String>,
    #[serde(default)]
    pub failed: Option<String>,
    #[serde(default)]
    pub skipped: Option<String>,
    #[serde(default)]
    pub pending: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub finished: Option<String>,
    #[serde(default)]
    pub watch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackReporterConfig {
    pub slack_options: SlackTransportConfig,
    #[serde(default)]
    pub emoji_symbols: EmojiOverrides,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub results_url: Option<String>,
    #[serde(default = "default_true")]
    pub notify_failed_case: bool,
    #[serde(default = "default_true")]
    pub notify_test_start_message: bool,
    #[serde(default = "default_true")]
    pub notify_test_finish_message: bool,
    #[serde(default)]
    pub use_scenario_based_state_counts: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SlackReporterConfig {
    pub fn new(slack_options: SlackTransportConfig) -> Self {
        Self {
            slack_options,
            emoji_symbols: EmojiOverrides::default(),
            title: None,
            results_url: None,
            notify_failed_case: true,
            notify_test_start_message: true,
            notify_test_finish_message: true,
            use_scenario_based_state_counts: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ReporterConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ReporterConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReporterConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiSymbols {
    pub passed: String,
    pub failed: String,
    pub skipped: String,
    pub pending: String,
    pub start: String,
    pub finished: String,
    pub watch: String,
}

impl Default for EmojiSymbols {
    fn default() -> Self {
        Self {
            passed: ":white_check_mark:".to_string(),
            failed: ":x:".to_string(),
            skipped: ":double_vertical_bar:".to_string(),
            pending: ":grey_question:".to_string(),
            start: ":rocket:".to_string(),
            finished: ":checkered_flag:".to_string(),
            watch: ":stopwatch:".to_string(),
        }
    }
}

impl EmojiSymbols {
    pub fn with_overrides(overrides: &EmojiOverrides) -> Self {
        fn pick(value: &Option<String>, fallback: String) -> String {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
                .unwrap_or(fallback)
        }
        let defaults = Self::default();
        Self {
            passed: pick(&overrides.passed, defaults.passed),
            failed: pick(&overrides.failed, defaults.failed),
            skipped: pick(&overrides.skipped, defaults.skipped),
            pending: pick(&overrides.pending, defaults.pending),
            start: pick(&overrides.start, defaults.start),
            finished: pick(&overrides.finished, defaults.finished),
            watch: pick(&overrides.watch, defaults.watch),
        }
    }

    pub fn symbol_for(&self, state: ResultState) -> &str {
        match state {
            ResultState::Passed => &self.passed,
            ResultState::Failed => &self.failed,
            ResultState::Skipped => &self.skipped,
            ResultState::Pending => &self.pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub token: String,
    pub channel: String,
    pub api_base: String,
    pub upload_screenshot_of_failed_case: bool,
    pub notify_detail_result_thread: bool,
    /// Empty means every state.
    pub filter_for_detail_results: Vec<ResultState>,
    pub wait_for_upload: bool,
    pub upload_timeout_ms: u64,
    pub upload_poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub url: String,
    pub identity: WebhookIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSettings {
    Channel(ChannelSettings),
    Webhook(WebhookSettings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterSettings {
    pub transport: TransportSettings,
    pub symbols: EmojiSymbols,
    pub title: Option<String>,
    pub results_url: Option<String>,
    pub notify_failed_case: bool,
    pub notify_test_start_message: bool,
    pub notify_test_finish_message: bool,
    pub use_scenario_based_state_counts: bool,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub poll_interval: Duration,
}

impl ReporterSettings {
    pub fn from_config(config: &SlackReporterConfig) -> Result<Self, ReporterConfigError> {
        if config.poll_interval_ms == 0 {
            return Err(ReporterConfigError::InvalidPollInterval);
        }
        let transport = match &config.slack_options {
            SlackTransportConfig::WebApi(options) => {
                TransportSettings::Channel(resolve_web_api(options, config)?)
            }
            SlackTransportConfig::Webhook(options) => {
                TransportSettings::Webhook(resolve_webhook(options)?)
            }
        };
        Ok(Self {
            transport,
            symbols: EmojiSymbols::with_overrides(&config.emoji_symbols),
            title: non_empty(config.title.as_deref()),
            results_url: non_empty(config.results_url.as_deref()),
            notify_failed_case: config.notify_failed_case,
            notify_test_start_message: config.notify_test_start_message,
            notify_test_finish_message: config.notify_test_finish_message,
            use_scenario_based_state_counts: config.use_scenario_based_state_counts,
            request_timeout_ms: config.request_timeout_ms.max(1),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    pub fn channel(&self) -> Option<&ChannelSettings> {
        match &self.transport {
            TransportSettings::Channel(channel) => Some(channel),
            TransportSettings::Webhook(_) => None,
        }
    }

    pub fn uses_channel_transport(&self) -> bool {
        self.channel().is_some()
    }

    /// Detail breakdown is channel-only and rides on the finish message.
    pub fn notifies_detail_results(&self) -> bool {
        self.notify_test_finish_message
            && self
                .channel()
                .map(|channel| channel.notify_detail_result_thread)
                .unwrap_or(false)
    }

    /// Screenshots are only accepted when they can actually be posted.
    pub fn accepts_screenshots(&self) -> bool {
        self.notify_failed_case
            && self
                .channel()
                .map(|channel| channel.upload_screenshot_of_failed_case)
                .unwrap_or(false)
    }

    pub fn detail_filter(&self) -> &[ResultState] {
        self.channel()
            .map(|channel| channel.filter_for_detail_results.as_slice())
            .unwrap_or(&[])
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn resolve_web_api(
    options: &WebApiOptions,
    config: &SlackReporterConfig,
) -> Result<ChannelSettings, ReporterConfigError> {
    let mut token = non_empty(options.token.as_deref());
    if let Some(legacy) = non_empty(options.slack_bot_token.as_deref()) {
        tracing::warn!(
            "`slack_bot_token` is deprecated; use `token` instead. it will be removed in the next major version"
        );
        token = Some(legacy);
    }
    let token = token.ok_or(ReporterConfigError::MissingToken)?;
    let channel = non_empty(Some(&options.channel)).ok_or(ReporterConfigError::MissingChannel)?;

    if options.notify_detail_result_thread && !config.notify_test_finish_message {
        tracing::warn!(
            "detail result thread is disabled because `notify_test_finish_message` is off"
        );
    }
    if !options.notify_detail_result_thread
        && options.filter_for_detail_results != default_detail_filter()
    {
        tracing::warn!(
            "detail result filters have no effect because `notify_detail_result_thread` is off"
        );
    }
    if options.filter_for_detail_results.is_empty() {
        tracing::info!("detail result filter list is empty; every state will be reported");
    }
    if options.upload_screenshot_of_failed_case && !config.notify_failed_case {
        tracing::warn!("screenshot upload is disabled because `notify_failed_case` is off");
    }

    let mut filter = Vec::with_capacity(options.filter_for_detail_results.len());
    for state in &options.filter_for_detail_results {
        if !filter.contains(state) {
            filter.push(*state);
        }
    }

    let api_base = non_empty(Some(&options.api_base)).unwrap_or_else(default_api_base);
    tracing::debug!(channel = channel.as_str(), api_base = api_base.as_str(), "resolved slack web api transport");
    Ok(ChannelSettings {
        token,
        channel,
        api_base: api_base.trim_end_matches('/').to_string(),
        upload_screenshot_of_failed_case: options.upload_screenshot_of_failed_case,
        notify_detail_result_thread: options.notify_detail_result_thread,
        filter_for_detail_results: filter,
        wait_for_upload: options.wait_for_upload,
        upload_timeout_ms: options.upload_timeout_ms.max(1),
        upload_poll_interval_ms: options.upload_poll_interval_ms.max(1),
    })
}

fn resolve_webhook(options: &WebhookOptions) -> Result<WebhookSettings, ReporterConfigError> {
    let url = non_empty(Some(&options.webhook)).ok_or(ReporterConfigError::MissingWebhookUrl)?;
    let parsed = reqwest::Url::parse(&url).map_err(|error| ReporterConfigError::InvalidWebhookUrl {
        url: url.clone(),
        reason: error.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ReporterConfigError::InvalidWebhookUrl {
            url,
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }

    let mut username = non_empty(options.username.as_deref());
    if let Some(legacy) = non_empty(options.slack_name.as_deref()) {
        tracing::warn!(
            "`slack_name` is deprecated; use `username` instead. it will be removed in the next major version"
        );
        username = Some(legacy);
    }
    let mut icon_url = non_empty(options.icon_url.as_deref());
    if let Some(legacy) = non_empty(options.slack_icon_url.as_deref()) {
        tracing::warn!(
            "`slack_icon_url` is deprecated; use `icon_url` instead. it will be removed in the next major version"
        );
        icon_url = Some(legacy);
    }
    let icon_emoji = non_empty(options.icon_emoji.as_deref());

    Ok(WebhookSettings {
        url,
        identity: WebhookIdentity {
            username: Some(username.unwrap_or_else(|| DEFAULT_WEBHOOK_USERNAME.to_string())),
            icon_url,
            icon_emoji,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{
        EmojiOverrides, EmojiSymbols, ReporterConfigError, ReporterSettings, SlackReporterConfig,
        SlackTransportConfig, TransportSettings, WebApiOptions, WebhookOptions,
        DEFAULT_WEBHOOK_USERNAME,
    };
    use crate::run_state::ResultState;

    #[test]
    fn unit_config_defaults_apply_when_keys_are_missing() {
        let config = SlackReporterConfig::from_json_str(
            r#"{"slack_options": {"type": "web-api", "token": "xoxb-1", "channel": "C1"}}"#,
        )
        .expect("parse config");
        assert!(config.notify_failed_case);
        assert!(config.notify_test_start_message);
        assert!(config.notify_test_finish_message);
        assert!(!config.use_scenario_based_state_counts);
        assert_eq!(config.poll_interval_ms, 100);

        let settings = ReporterSettings::from_config(&config).expect("settings");
        let channel = settings.channel().expect("channel transport");
        assert_eq!(channel.api_base, "https://slack.com/api");
        assert_eq!(channel.filter_for_detail_results.len(), 4);
        assert!(channel.wait_for_upload);
        assert!(settings.notifies_detail_results());
        assert!(settings.accepts_screenshots());
    }

    #[test]
    fn unit_web_api_requires_token_and_channel() {
        let mut options = WebApiOptions::new("", "C1");
        let config = SlackReporterConfig::new(SlackTransportConfig::WebApi(options.clone()));
        assert!(matches!(
            ReporterSettings::from_config(&config),
            Err(ReporterConfigError::MissingToken)
        ));

        options.token = Some("xoxb".to_string());
        options.channel = "  ".to_string();
        let config = SlackReporterConfig::new(SlackTransportConfig::WebApi(options));
        assert!(matches!(
            ReporterSettings::from_config(&config),
            Err(ReporterConfigError::MissingChannel)
        ));
    }

    #[test]
    fn regression_deprecated_bot_token_alias_is_still_honored() {
        let config = SlackReporterConfig::from_json_str(
            r#"{"slack_options": {"type": "web-api", "slack_bot_token": "xoxb-legacy", "channel": "C1"}}"#,
        )
        .expect("parse config");
        let settings = ReporterSettings::from_config(&config).expect("settings");
        assert_eq!(settings.channel().map(|c| c.token.as_str()), Some("xoxb-legacy"));
    }

    #[test]
    fn unit_webhook_identity_defaults_and_deprecated_aliases() {
        let config = SlackReporterConfig::new(SlackTransportConfig::Webhook(WebhookOptions::new(
            "https://hooks.slack.com/services/T/B/X",
        )));
        let settings = ReporterSettings::from_config(&config).expect("settings");
        let TransportSettings::Webhook(webhook) = &settings.transport else {
            panic!("expected webhook transport");
        };
        assert_eq!(webhook.identity.username.as_deref(), Some(DEFAULT_WEBHOOK_USERNAME));
        assert!(!settings.accepts_screenshots());
        assert!(!settings.notifies_detail_results());

        let mut options = WebhookOptions::new("https://hooks.slack.com/services/T/B/X");
        options.slack_name = Some("CI".to_string());
        options.slack_icon_url = Some("https://example.com/icon.png".to_string());
        let config = SlackReporterConfig::new(SlackTransportConfig::Webhook(options));
        let settings = ReporterSettings::from_config(&config).expect("settings");
        let TransportSettings::Webhook(webhook) = &settings.transport else {
            panic!("expected webhook transport");
        };
        assert_eq!(webhook.identity.username.as_deref(), Some("CI"));
        assert_eq!(
            webhook.identity.icon_url.as_deref(),
            Some("https://example.com/icon.png")
        );
    }

    #[test]
    fn unit_webhook_url_must_be_http() {
        let config = SlackReporterConfig::new(SlackTransportConfig::Webhook(WebhookOptions::new(
            "ftp://hooks.example.com",
        )));
        assert!(matches!(
            ReporterSettings::from_config(&config),
            Err(ReporterConfigError::InvalidWebhookUrl { .. })
        ));
        let config = SlackReporterConfig::new(SlackTransportConfig::Webhook(WebhookOptions::new("")));
        assert!(matches!(
            ReporterSettings::from_config(&config),
            Err(ReporterConfigError::MissingWebhookUrl)
        ));
    }

    #[test]
    fn unit_zero_poll_interval_is_rejected() {
        let mut config =
            SlackReporterConfig::new(SlackTransportConfig::WebApi(WebApiOptions::new("t", "C1")));
        config.poll_interval_ms = 0;
        assert!(matches!(
            ReporterSettings::from_config(&config),
            Err(ReporterConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn unit_emoji_overrides_replace_only_non_empty_entries() {
        let symbols = EmojiSymbols::with_overrides(&EmojiOverrides {
            passed: Some(":ok:".to_string()),
            failed: Some("   ".to_string()),
            ..EmojiOverrides::default()
        });
        assert_eq!(symbols.symbol_for(ResultState::Passed), ":ok:");
        assert_eq!(symbols.symbol_for(ResultState::Failed), ":x:");
        assert_eq!(symbols.symbol_for(ResultState::Pending), ":grey_question:");
    }

    #[test]
    fn functional_load_reads_config_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"slack_options": {{"type": "webhook", "webhook": "https://hooks.example.com/x"}}, "title": "Nightly"}}"#
        )
        .expect("write config");
        let config = SlackReporterConfig::load(file.path()).expect("load config");
        assert_eq!(config.title.as_deref(), Some("Nightly"));

        let missing = SlackReporterConfig::load(std::path::Path::new("/definitely/missing.json"));
        assert!(matches!(missing, Err(ReporterConfigError::Read { .. })));
    }
}
