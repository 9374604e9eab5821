//! Slack Web API client for the channel transport.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::reporter_config::ChannelSettings;
use crate::slack_http_helpers::{build_http_client, send_with_retry, truncate_for_error, RetryPolicy};
use crate::slack_payloads::{FileUpload, OutboundMessage};
use crate::transport::{
    DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport, PostedMessage, UploadedFile,
};

const USER_AGENT: &str = "tau-slack-reporter";

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackGetUploadUrlExternalResponse {
    ok: bool,
    upload_url: Option<String>,
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackCompleteUploadExternalResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackFileInfo {
    mimetype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackFilesInfoResponse {
    ok: bool,
    file: Option<SlackFileInfo>,
    error: Option<String>,
}

fn slack_error(operation: &str, error: Option<String>) -> anyhow::Error {
    anyhow!(
        "slack {operation} failed: {}",
        error.unwrap_or_else(|| "unknown error".to_string())
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Polling of `files.info` after an external upload completes.
pub struct UploadWaitPolicy {
    pub enabled: bool,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    channel: String,
    retry: RetryPolicy,
    upload_wait: UploadWaitPolicy,
}

impl SlackApiClient {
    pub fn new(
        settings: &ChannelSettings,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let http = build_http_client(USER_AGENT, request_timeout_ms)?;
        tracing::info!(
            channel = settings.channel.as_str(),
            "created slack web api client"
        );
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            bot_token: settings.token.trim().to_string(),
            channel: settings.channel.trim().to_string(),
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
            upload_wait: UploadWaitPolicy {
                enabled: settings.wait_for_upload,
                timeout: Duration::from_millis(settings.upload_timeout_ms.max(1)),
                poll_interval: Duration::from_millis(settings.upload_poll_interval_ms.max(1)),
            },
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn post_message(
        &self,
        message: &OutboundMessage,
        thread_ts: Option<&str>,
    ) -> Result<PostedMessage> {
        let channel = message
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.channel);
        let payload = message.to_chat_payload(channel, thread_ts);

        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            return Err(slack_error("chat.postMessage", response.error));
        }

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    /// External upload flow: reserve an upload url, push the bytes, then
    /// share the file into the channel (and thread, when given).
    pub async fn upload_file(
        &self,
        upload: &FileUpload,
        thread_ts: Option<&str>,
    ) -> Result<UploadedFile> {
        let filename = upload.filename.trim();
        if filename.is_empty() {
            bail!("slack files upload requires non-empty filename");
        }
        let file_size = upload.bytes.len();
        if file_size == 0 {
            bail!("slack files upload requires non-empty payload");
        }
        let channel = upload
            .channel
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.channel);

        let get_upload: SlackGetUploadUrlExternalResponse = self
            .request_json("files.getUploadURLExternal", || {
                self.http
                    .post(format!("{}/files.getUploadURLExternal", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&json!({
                        "filename": filename,
                        "length": file_size,
                    }))
            })
            .await?;
        if !get_upload.ok {
            return Err(slack_error("files.getUploadURLExternal", get_upload.error));
        }
        let upload_url = get_upload
            .upload_url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing upload_url"))?;
        let file_id = get_upload
            .file_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack files.getUploadURLExternal missing file_id"))?;

        let upload_response = self
            .http
            .post(upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(upload.bytes.clone())
            .send()
            .await
            .context("failed to upload file payload to slack external upload URL")?;
        if !upload_response.status().is_success() {
            let status = upload_response.status();
            let body = upload_response.text().await.unwrap_or_default();
            bail!(
                "slack external upload failed: status={} body={}",
                status,
                truncate_for_error(&body, 320)
            );
        }

        let title = upload
            .title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(filename);
        let mut complete_payload = json!({
            "files": [{ "id": file_id.clone(), "title": title }],
            "channel_id": channel,
        });
        if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
            complete_payload["thread_ts"] = Value::String(thread_ts.to_string());
        }
        if let Some(initial_comment) = upload
            .initial_comment
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            complete_payload["initial_comment"] = Value::String(initial_comment.to_string());
        }

        let complete: SlackCompleteUploadExternalResponse = self
            .request_json("files.completeUploadExternal", || {
                self.http
                    .post(format!("{}/files.completeUploadExternal", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&complete_payload)
            })
            .await?;
        if !complete.ok {
            return Err(slack_error("files.completeUploadExternal", complete.error));
        }

        if !self.upload_wait.enabled {
            return Ok(UploadedFile {
                file_id,
                ready: true,
            });
        }
        let ready = match self.wait_for_upload(&file_id).await {
            Ok(ready) => ready,
            Err(error) => {
                tracing::warn!(
                    file_id = file_id.as_str(),
                    error = %error,
                    "slack upload completion check failed"
                );
                false
            }
        };
        Ok(UploadedFile { file_id, ready })
    }

    /// Polls `files.info` until Slack reports a mimetype. Returns `false`
    /// when the wait times out.
    pub async fn wait_for_upload(&self, file_id: &str) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.upload_wait.timeout;
        loop {
            if self.file_mimetype(file_id).await?.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() + self.upload_wait.poll_interval > deadline {
                tracing::warn!(
                    file_id,
                    timeout_ms = self.upload_wait.timeout.as_millis() as u64,
                    "no file mimetype reported before upload wait timeout"
                );
                return Ok(false);
            }
            tokio::time::sleep(self.upload_wait.poll_interval).await;
        }
    }

    async fn file_mimetype(&self, file_id: &str) -> Result<Option<String>> {
        let response: SlackFilesInfoResponse = self
            .request_json("files.info", || {
                self.http
                    .get(format!("{}/files.info", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .query(&[("file", file_id)])
            })
            .await?;
        if !response.ok {
            return Err(slack_error("files.info", response.error));
        }
        Ok(response
            .file
            .and_then(|file| file.mimetype)
            .filter(|mimetype| !mimetype.trim().is_empty()))
    }

    async fn request_json<T, F>(&self, operation: &str, builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = send_with_retry(operation, self.retry, builder).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode slack {operation}"))
    }
}

#[async_trait]
impl DeliveryTransport for SlackApiClient {
    fn name(&self) -> &'static str {
        "slack-web-api"
    }

    fn supports(&self, kind: DeliveryKind) -> bool {
        matches!(kind, DeliveryKind::PostMessage | DeliveryKind::UploadFile)
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        thread_ts: Option<&str>,
    ) -> Result<DeliveryReceipt> {
        match request {
            DeliveryRequest::PostMessage(message) => self
                .post_message(message, thread_ts)
                .await
                .map(DeliveryReceipt::Posted),
            DeliveryRequest::UploadFile(upload) => self
                .upload_file(upload, thread_ts)
                .await
                .map(DeliveryReceipt::Uploaded),
            DeliveryRequest::WebhookSend(_) => {
                bail!("slack web api client cannot deliver webhook sends")
            }
        }
    }
}
