use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapter::EngineAdapter;
use crate::error::Result;
use crate::types::{EngineEvent, EngineRequest};

/// Delegates execution to a remote HTTP engine service, streaming its
/// response body as NDJSON. Keys each call by `thread_ts` exactly as
/// `_execute_remote` uses `thread_ts` as `request_id`, tracking it for the
/// interrupt path the same way `_active_remote_requests` does.
pub struct RemoteEngineAdapter {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    active: Arc<Mutex<HashSet<String>>>,
}

impl RemoteEngineAdapter {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl EngineAdapter for RemoteEngineAdapter {
    async fn run(
        &self,
        req: EngineRequest,
        tx: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let request_id = req.thread_ts.clone();
        self.active.lock().await.insert(request_id.clone());

        let body = serde_json::json!({
            "request_id": request_id,
            "prompt": req.prompt,
            "model": req.model,
            "resume_session_id": req.session_id.as_deref(),
            "system_prompt": req.system_prompt,
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                self.fire_interrupt(&request_id).await;
                Ok(())
            }
            response = self.client
                .post(format!("{}/execute", self.base_url))
                .json(&body)
                .timeout(self.timeout)
                .send() => {
                self.stream_response(response?, &tx).await
            }
        };

        self.active.lock().await.remove(&request_id);
        result
    }

    async fn interrupt(&self, thread_ts: &str) -> bool {
        if self.active.lock().await.contains(thread_ts) {
            self.fire_interrupt(thread_ts).await;
            true
        } else {
            false
        }
    }
}

impl RemoteEngineAdapter {
    async fn stream_response(
        &self,
        response: reqwest::Response,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        let mut buf = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(idx) = buf.find('\n') {
                let line = buf[..idx].to_string();
                buf.drain(..=idx);
                match EngineEvent::parse_line(&line) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "skipping unparsable remote engine line"),
                }
            }
        }
        Ok(())
    }

    async fn fire_interrupt(&self, request_id: &str) {
        let url = format!("{}/interrupt/{}", self.base_url, request_id);
        if let Err(err) = self.client.post(url).send().await {
            warn!(request_id, error = %err, "remote interrupt request failed");
        }
    }
}
