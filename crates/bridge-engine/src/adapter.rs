use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{EngineEvent, EngineRequest};

/// Generalizes the teacher's `LlmProvider::send_stream` from a single-shot
/// chat completion stream to the engine's richer per-line NDJSON protocol.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn run(
        &self,
        req: EngineRequest,
        tx: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Best-effort: asks a running call for `thread_ts` to stop. Returns
    /// `false` if there was nothing to interrupt.
    async fn interrupt(&self, thread_ts: &str) -> bool;
}
