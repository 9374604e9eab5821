//! Renders run state into Slack payloads.
//!
//! [`NotificationBuilder`] carries one default method per message kind.
//! Custom builders override only the messages they want to change and may
//! call the `render_*` functions to reuse the stock layout.

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::capability_render::render_environment;
use crate::reporter_config::{EmojiSymbols, DEFAULT_COLOR, FAILED_COLOR, FINISHED_COLOR};
use crate::run_events::{HookStats, RunnerStats, TestStats};
use crate::run_state::{DetailSection, EntryKind, ResultState, StateCounts, SuiteRef};
use crate::slack_payloads::{
    color_attachment, context_block, header_block, section_block, FileUpload, OutboundMessage,
    ThreadPlacement,
};

/// Slack allows 50 blocks per message; the rest of the detail message uses
/// a header, a totals section, a filter context and an omission note.
pub const MAX_DETAIL_SECTIONS: usize = 45;
pub const DETAIL_INDENT: &str = "\t";
pub const NO_FILTER_RESULTS_TEXT: &str = "*`No filter Results.`*";

const ANSI_ESCAPE_PATTERN: &str =
    r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]";

#[derive(Debug, Clone, Copy)]
/// Reporter-level values every builder may read.
pub struct RenderContext<'a> {
    pub symbols: &'a EmojiSymbols,
    pub title: Option<&'a str>,
    pub results_url: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub detail_filter: &'a [ResultState],
    pub current_suite: Option<&'a SuiteRef>,
}

#[derive(Debug, Clone, Copy)]
pub enum FailedCase<'a> {
    Test(&'a TestStats),
    Hook(&'a HookStats),
}

impl FailedCase<'_> {
    pub fn title(&self) -> String {
        match self {
            Self::Test(test) => test.display_title().to_string(),
            Self::Hook(hook) if hook.parent.trim().is_empty() => hook.title.clone(),
            Self::Hook(hook) => format!("{} > {}", hook.parent, hook.title),
        }
    }

    pub fn parent(&self) -> &str {
        match self {
            Self::Test(test) => &test.parent,
            Self::Hook(hook) => &hook.parent,
        }
    }

    /// One entry per captured error, stack preferred over message.
    pub fn error_stacks(&self) -> Vec<&str> {
        match self {
            Self::Test(test) => test
                .errors
                .iter()
                .map(|error| error.stack_or_message())
                .filter(|stack| !stack.trim().is_empty())
                .collect(),
            Self::Hook(hook) => hook
                .error
                .iter()
                .map(|error| error.stack_or_message())
                .filter(|stack| !stack.trim().is_empty())
                .collect(),
        }
    }
}

pub trait NotificationBuilder: Send + Sync {
    fn start_message(&self, ctx: &RenderContext<'_>, runner: &RunnerStats) -> Result<OutboundMessage> {
        Ok(render_start_message(ctx, runner))
    }

    fn failure_message(&self, ctx: &RenderContext<'_>, case: FailedCase<'_>) -> Result<OutboundMessage> {
        Ok(render_failure_message(ctx, case))
    }

    fn result_message(
        &self,
        ctx: &RenderContext<'_>,
        runner: &RunnerStats,
        counts: &StateCounts,
    ) -> Result<OutboundMessage> {
        Ok(render_result_message(ctx, runner, counts))
    }

    fn result_detail_message(
        &self,
        ctx: &RenderContext<'_>,
        runner: &RunnerStats,
        counts: &StateCounts,
        sections: &[DetailSection],
    ) -> Result<OutboundMessage> {
        Ok(render_result_detail_message(ctx, runner, counts, sections))
    }

    fn screenshot_upload(
        &self,
        ctx: &RenderContext<'_>,
        test: &TestStats,
        bytes: Vec<u8>,
    ) -> Result<FileUpload> {
        Ok(render_screenshot_upload(ctx, test, bytes))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNotificationBuilder;

impl NotificationBuilder for DefaultNotificationBuilder {}

fn ansi_escape_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(ANSI_ESCAPE_PATTERN).expect("ansi escape pattern is a valid regex")
    })
}

/// Removes ANSI escape sequences and other control characters, keeping
/// newlines and tabs.
pub fn strip_terminal_escapes(raw: &str) -> String {
    ansi_escape_regex()
        .replace_all(raw, "")
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect()
}

pub fn format_counts(symbols: &EmojiSymbols, counts: &StateCounts) -> String {
    format!(
        "*{} Passed: {} | {} Failed: {} | {} Skipped: {}*",
        symbols.passed, counts.passed, symbols.failed, counts.failed, symbols.skipped, counts.skipped
    )
}

pub fn format_duration_seconds(runner: &RunnerStats) -> String {
    format!("{}s", runner.duration_seconds())
}

fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn with_channel(mut message: OutboundMessage, ctx: &RenderContext<'_>) -> OutboundMessage {
    message.channel = ctx.channel.map(ToOwned::to_owned);
    message
}

pub fn render_start_message(ctx: &RenderContext<'_>, runner: &RunnerStats) -> OutboundMessage {
    let mut body = String::new();
    if let Some(title) = ctx.title {
        body.push_str(&format!("*Title*: `{title}`\n"));
    }
    body.push_str(&render_environment(&runner.capabilities, runner.multiremote));

    let headline = format!("{} Start testing", ctx.symbols.start);
    let text = match ctx.title {
        Some(title) => format!("{headline} for {title}"),
        None => headline.clone(),
    };
    let message = OutboundMessage::new(text)
        .with_block(header_block(&headline))
        .with_attachment(color_attachment(DEFAULT_COLOR, None, &body, Some(timestamp_now())))
        .with_placement(ThreadPlacement::TopLevel);
    with_channel(message, ctx)
}

pub fn render_failure_message(ctx: &RenderContext<'_>, case: FailedCase<'_>) -> OutboundMessage {
    let headline = format!("{} Test failure", ctx.symbols.failed);
    let suite_title = ctx
        .current_suite
        .map(|suite| suite.title.as_str())
        .unwrap_or_else(|| case.parent());
    let stacks = case
        .error_stacks()
        .into_iter()
        .map(|stack| format!("```{}```", strip_terminal_escapes(stack)))
        .collect::<Vec<_>>();
    let mut body = format!("* » {}*", case.title());
    if !stacks.is_empty() {
        body.push('\n');
        body.push_str(&stacks.join("\n"));
    }

    let message = OutboundMessage::new(headline.clone())
        .with_block(header_block(&headline))
        .with_attachment(color_attachment(FAILED_COLOR, Some(suite_title), &body, None))
        .with_placement(ThreadPlacement::Reply);
    with_channel(message, ctx)
}

pub fn render_result_message(
    ctx: &RenderContext<'_>,
    runner: &RunnerStats,
    counts: &StateCounts,
) -> OutboundMessage {
    let counts_line = format_counts(ctx.symbols, counts);
    let text = match ctx.title {
        Some(title) => format!("{} End of test - {title}\n{counts_line}", ctx.symbols.finished),
        None => format!("{} End of test\n{counts_line}", ctx.symbols.finished),
    };
    let headline = format!(
        "{} End of test - {} {}",
        ctx.symbols.finished,
        ctx.symbols.watch,
        format_duration_seconds(runner)
    );
    let mut body = String::new();
    if let Some(title) = ctx.title {
        body.push_str(&format!("*Title*: `{title}`\n"));
    }
    if let Some(url) = ctx.results_url {
        body.push_str(&format!("*Results*: <{url}>\n"));
    }
    body.push_str(&counts_line);

    let message = OutboundMessage::new(text)
        .with_block(header_block(&headline))
        .with_attachment(color_attachment(FINISHED_COLOR, None, &body, Some(timestamp_now())))
        .with_placement(ThreadPlacement::Reply);
    with_channel(message, ctx)
}

/// One mrkdwn section per suite, suite title bold and indented by depth.
pub fn render_detail_section(symbols: &EmojiSymbols, section: &DetailSection) -> String {
    let suite_indent = DETAIL_INDENT.repeat(section.depth);
    let mut lines = vec![format!("*{suite_indent}{}*", section.title)];
    if let Some(description) = section.description.as_deref() {
        lines.extend(
            description
                .trim()
                .lines()
                .map(|line| format!("{suite_indent}{}", line.trim())),
        );
    }
    let entry_indent = format!("{DETAIL_INDENT}{suite_indent}");
    for entry in &section.entries {
        let symbol = entry
            .state
            .map(|state| format!("{} ", symbols.symbol_for(state)))
            .unwrap_or_default();
        let marker = match entry.kind {
            EntryKind::Test => "",
            EntryKind::Hook => "(hook) ",
        };
        lines.push(format!("*{entry_indent}{symbol}{marker}{}*", entry.title));
    }
    lines.join("\n")
}

pub fn render_filter_context(filter: &[ResultState]) -> String {
    let states = if filter.is_empty() {
        ResultState::ALL.as_slice()
    } else {
        filter
    };
    let rendered = states
        .iter()
        .map(|state| format!("`{}`", state.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("*Filter*: {rendered}")
}

pub fn render_result_detail_message(
    ctx: &RenderContext<'_>,
    runner: &RunnerStats,
    counts: &StateCounts,
    sections: &[DetailSection],
) -> OutboundMessage {
    let counts_line = format_counts(ctx.symbols, counts);
    let text = match ctx.title {
        Some(title) => format!("{title}\n{counts_line}"),
        None => counts_line.clone(),
    };

    let mut message = OutboundMessage::new(text).with_block(header_block("Result Details"));
    if sections.is_empty() {
        message = message.with_block(section_block(NO_FILTER_RESULTS_TEXT));
    } else {
        message = message.with_blocks(
            sections
                .iter()
                .take(MAX_DETAIL_SECTIONS)
                .map(|section| section_block(&render_detail_section(ctx.symbols, section))),
        );
        let omitted = sections.len().saturating_sub(MAX_DETAIL_SECTIONS);
        if omitted > 0 {
            tracing::warn!(omitted, "detail result message truncated to slack block limit");
            message = message.with_block(context_block(&format!(
                "_{omitted} more suite(s) omitted_"
            )));
        }
    }
    message = message
        .with_block(section_block(&format!(
            "{counts_line}\n{} {}",
            ctx.symbols.watch,
            format_duration_seconds(runner)
        )))
        .with_block(context_block(&render_filter_context(ctx.detail_filter)))
        .with_placement(ThreadPlacement::Reply);
    with_channel(message, ctx)
}

pub fn render_screenshot_upload(
    ctx: &RenderContext<'_>,
    test: &TestStats,
    bytes: Vec<u8>,
) -> FileUpload {
    let mut upload = FileUpload::new(format!("{}.png", test.uid), bytes)
        .with_initial_comment(format!("Screenshot for Fail to {}", test.display_title()));
    upload.channel = ctx.channel.map(ToOwned::to_owned);
    upload.title = Some(test.display_title().to_string());
    upload
}
