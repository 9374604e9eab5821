use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::transport::{
    DeliveryKind, DeliveryReceipt, DeliveryRequest, DeliveryTransport, PostedMessage, UploadedFile,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub(crate) kind: DeliveryKind,
    pub(crate) thread_ts: Option<String>,
    pub(crate) request: DeliveryRequest,
}

impl RecordedCall {
    pub(crate) fn label(&self) -> &str {
        match &self.request {
            DeliveryRequest::PostMessage(message) | DeliveryRequest::WebhookSend(message) => {
                &message.text
            }
            DeliveryRequest::UploadFile(upload) => &upload.filename,
        }
    }
}

/// In-memory transport that records every delivery and answers posts with
/// sequential timestamps `1.0`, `2.0`, ...
pub(crate) struct RecordingTransport {
    supported: Vec<DeliveryKind>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_when_label_contains: Option<String>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingTransport {
    pub(crate) fn channel() -> Self {
        Self::with_kinds(vec![DeliveryKind::PostMessage, DeliveryKind::UploadFile])
    }

    pub(crate) fn webhook() -> Self {
        Self::with_kinds(vec![DeliveryKind::WebhookSend])
    }

    fn with_kinds(supported: Vec<DeliveryKind>) -> Self {
        Self {
            supported,
            calls: Mutex::new(Vec::new()),
            fail_when_label_contains: None,
            gate: None,
        }
    }

    pub(crate) fn failing_on(mut self, needle: &str) -> Self {
        self.fail_when_label_contains = Some(needle.to_string());
        self
    }

    /// Every delivery waits for one permit from `gate`.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| call.label().to_string())
            .collect()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn supports(&self, kind: DeliveryKind) -> bool {
        self.supported.contains(&kind)
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        thread_ts: Option<&str>,
    ) -> Result<DeliveryReceipt> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        let call = RecordedCall {
            kind: request.kind(),
            thread_ts: thread_ts.map(ToOwned::to_owned),
            request: request.clone(),
        };
        let fail = self
            .fail_when_label_contains
            .as_deref()
            .map(|needle| call.label().contains(needle))
            .unwrap_or(false);
        let sequence = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| anyhow::anyhow!("recording transport poisoned"))?;
            calls.push(call);
            calls.len()
        };
        if fail {
            bail!("simulated slack failure");
        }
        Ok(match request {
            DeliveryRequest::PostMessage(_) => DeliveryReceipt::Posted(PostedMessage {
                channel: "C-TEST".to_string(),
                ts: format!("{sequence}.0"),
            }),
            DeliveryRequest::UploadFile(_) => DeliveryReceipt::Uploaded(UploadedFile {
                file_id: format!("F{sequence}"),
                ready: true,
            }),
            DeliveryRequest::WebhookSend(_) => DeliveryReceipt::Sent,
        })
    }
}
