//! Incoming-webhook client. Webhooks post into one fixed channel and cannot
//! thread or upload files.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::reporter_config::WebhookSettings;
use crate::slack_http_helpers::{build_http_client, send_with_retry, RetryPolicy};
use crate::slack_payloads::{OutboundMessage, WebhookIdentity};
use crate::transport::{DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport};

const USER_AGENT: &str = "tau-slack-reporter-webhook";

#[derive(Clone)]
pub struct SlackWebhookClient {
    http: reqwest::Client,
    url: String,
    identity: WebhookIdentity,
    retry: RetryPolicy,
}

impl SlackWebhookClient {
    pub fn new(
        settings: &WebhookSettings,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let http = build_http_client(USER_AGENT, request_timeout_ms)?;
        tracing::info!(
            username = settings.identity.username.as_deref().unwrap_or_default(),
            "created slack webhook client"
        );
        Ok(Self {
            http,
            url: settings.url.trim().to_string(),
            identity: settings.identity.clone(),
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
        })
    }

    pub fn identity(&self) -> &WebhookIdentity {
        &self.identity
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let payload = message.to_webhook_payload(&self.identity);
        send_with_retry("webhook send", self.retry, || {
            self.http.post(&self.url).json(&payload)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for SlackWebhookClient {
    fn name(&self) -> &'static str {
        "slack-webhook"
    }

    fn supports(&self, kind: DeliveryKind) -> bool {
        kind == DeliveryKind::WebhookSend
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        _thread_ts: Option<&str>,
    ) -> Result<DeliveryReceipt> {
        match request {
            DeliveryRequest::WebhookSend(message) => {
                self.send(message).await?;
                Ok(DeliveryReceipt::Sent)
            }
            other => bail!(
                "slack webhook client cannot deliver {}",
                other.kind().as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::SlackWebhookClient;
    use crate::reporter_config::WebhookSettings;
    use crate::slack_payloads::{OutboundMessage, WebhookIdentity};
    use crate::transport::{DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport};

    fn client(server: &MockServer) -> SlackWebhookClient {
        SlackWebhookClient::new(
            &WebhookSettings {
                url: server.url("/services/T/B/X"),
                identity: WebhookIdentity {
                    username: Some("Tau Test Reporter".to_string()),
                    icon_url: None,
                    icon_emoji: None,
                },
            },
            2_000,
            2,
            1,
        )
        .expect("webhook client")
    }

    #[tokio::test]
    async fn functional_send_posts_identity_without_channel() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST)
                .path("/services/T/B/X")
                .json_body(json!({"text": "hello", "username": "Tau Test Reporter"}));
            then.status(200).body("ok");
        });

        let mut message = OutboundMessage::new("hello");
        message.channel = Some("C1".to_string());
        let receipt = client(&server)
            .deliver(&DeliveryRequest::WebhookSend(message), Some("1.1"))
            .await
            .expect("webhook send");
        assert_eq!(receipt, DeliveryReceipt::Sent);
        hook.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_webhook_refuses_posts_and_uploads() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });
        let webhook = client(&server);
        assert!(webhook.supports(DeliveryKind::WebhookSend));
        assert!(!webhook.supports(DeliveryKind::UploadFile));
        assert!(!webhook.supports(DeliveryKind::PostMessage));
        let error = webhook
            .deliver(&DeliveryRequest::PostMessage(OutboundMessage::new("x")), None)
            .await
            .expect_err("unsupported");
        assert!(error.to_string().contains("web-api:message"));
        hook.assert_calls(0);
    }

    #[tokio::test]
    async fn unit_send_reports_non_retryable_failure() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST).path("/services/T/B/X");
            then.status(404).body("no_service");
        });
        let error = client(&server)
            .send(&OutboundMessage::new("x"))
            .await
            .expect_err("404");
        assert!(error.to_string().contains("404"));
        hook.assert_calls(1);
    }
}
