//! Transport seam between the delivery queue and the Slack clients.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::slack_payloads::{FileUpload, OutboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    PostMessage,
    UploadFile,
    WebhookSend,
}

impl DeliveryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostMessage => "web-api:message",
            Self::UploadFile => "web-api:upload",
            Self::WebhookSend => "webhook:send",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryRequest {
    PostMessage(OutboundMessage),
    UploadFile(FileUpload),
    WebhookSend(OutboundMessage),
}

impl DeliveryRequest {
    pub fn kind(&self) -> DeliveryKind {
        match self {
            Self::PostMessage(_) => DeliveryKind::PostMessage,
            Self::UploadFile(_) => DeliveryKind::UploadFile,
            Self::WebhookSend(_) => DeliveryKind::WebhookSend,
        }
    }

    /// Thread target carried by the payload itself, if any.
    pub fn explicit_thread_ts(&self) -> Option<&str> {
        let thread_ts = match self {
            Self::PostMessage(message) | Self::WebhookSend(message) => message.thread_ts.as_deref(),
            Self::UploadFile(upload) => upload.thread_ts.as_deref(),
        };
        thread_ts.map(str::trim).filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    /// False when completion polling gave up before Slack reported a
    /// mimetype for the file.
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    Posted(PostedMessage),
    Uploaded(UploadedFile),
    Sent,
}

impl DeliveryReceipt {
    pub fn posted_ts(&self) -> Option<&str> {
        match self {
            Self::Posted(posted) => Some(posted.ts.as_str()),
            Self::Uploaded(_) | Self::Sent => None,
        }
    }
}

#[async_trait]
/// A Slack backend. Each backend accepts a fixed set of task kinds.
pub trait DeliveryTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, kind: DeliveryKind) -> bool;

    /// Performs one request. `thread_ts` is the resolved thread target and
    /// overrides whatever the payload carries.
    async fn deliver(
        &self,
        request: &DeliveryRequest,
        thread_ts: Option<&str>,
    ) -> Result<DeliveryReceipt>;
}
