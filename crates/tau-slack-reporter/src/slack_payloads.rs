//! Transport-agnostic Slack payloads produced by message builders.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::slack_http_helpers::truncate_for_slack;

/// Slack rejects `section` text longer than this many characters.
pub const SLACK_SECTION_TEXT_MAX_CHARS: usize = 3_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Where a posted message lands relative to the run's thread anchor.
pub enum ThreadPlacement {
    /// Reply into the current anchor when one exists.
    #[default]
    Reply,
    /// Post to the channel and make the result the new anchor.
    TopLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A chat message for either `chat.postMessage` or an incoming webhook.
pub struct OutboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
    /// Explicit thread target. Bypasses the queue's anchor bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub placement: ThreadPlacement,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_block(mut self, block: Value) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = Value>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_placement(mut self, placement: ThreadPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Body for `chat.postMessage`.
    pub(crate) fn to_chat_payload(&self, channel: &str, thread_ts: Option<&str>) -> Value {
        let mut payload = json!({
            "channel": channel,
            "text": self.text,
            "mrkdwn": true,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if !self.blocks.is_empty() {
            payload["blocks"] = Value::Array(self.blocks.clone());
        }
        if !self.attachments.is_empty() {
            payload["attachments"] = Value::Array(self.attachments.clone());
        }
        if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }
        payload
    }

    /// Body for an incoming webhook. Webhooks post to a fixed channel, so
    /// channel and thread fields are never sent.
    pub(crate) fn to_webhook_payload(&self, identity: &WebhookIdentity) -> Value {
        let mut payload = json!({ "text": self.text });
        if !self.blocks.is_empty() {
            payload["blocks"] = Value::Array(self.blocks.clone());
        }
        if !self.attachments.is_empty() {
            payload["attachments"] = Value::Array(self.attachments.clone());
        }
        if let Some(username) = identity.username.as_deref() {
            payload["username"] = Value::String(username.to_string());
        }
        if let Some(icon_url) = identity.icon_url.as_deref() {
            payload["icon_url"] = Value::String(icon_url.to_string());
        }
        if let Some(icon_emoji) = identity.icon_emoji.as_deref() {
            payload["icon_emoji"] = Value::String(icon_emoji.to_string());
        }
        payload
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Display identity attached to every webhook payload.
pub struct WebhookIdentity {
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub icon_emoji: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// A binary attachment for the external upload flow.
pub struct FileUpload {
    pub channel: Option<String>,
    pub filename: String,
    pub title: Option<String>,
    pub initial_comment: Option<String>,
    pub bytes: Vec<u8>,
    pub thread_ts: Option<String>,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            ..Self::default()
        }
    }

    pub fn with_initial_comment(mut self, comment: impl Into<String>) -> Self {
        self.initial_comment = Some(comment.into());
        self
    }
}

pub fn header_block(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": truncate_for_slack(text, 150), "emoji": true },
    })
}

pub fn section_block(mrkdwn: &str) -> Value {
    json!({
        "type": "section",
        "text": {
            "type": "mrkdwn",
            "text": truncate_for_slack(mrkdwn, SLACK_SECTION_TEXT_MAX_CHARS),
        },
    })
}

pub fn context_block(mrkdwn: &str) -> Value {
    json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": mrkdwn }],
    })
}

/// Legacy attachment with a colored side bar.
pub fn color_attachment(color: &str, title: Option<&str>, text: &str, ts: Option<i64>) -> Value {
    let mut attachment = json!({ "color": color, "text": text });
    if let Some(title) = title {
        attachment["title"] = Value::String(title.to_string());
    }
    if let Some(ts) = ts {
        attachment["ts"] = Value::String(ts.to_string());
    }
    attachment
}
