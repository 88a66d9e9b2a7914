use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::EngineAdapter;
use crate::error::{EngineError, Result};
use crate::types::{EngineEvent, EngineRequest};

/// Spawns the engine binary as a subprocess per call and parses its stdout
/// as NDJSON, one `EngineEvent` per line. Generalizes the teacher's
/// `ClaudeCliProvider` (one-shot `-p --output-format json` call) into a
/// streaming line-by-line reader, since the engine protocol (§6) is
/// explicitly streaming.
pub struct LocalEngineAdapter {
    binary_path: String,
    timeout: Duration,
    /// Tracks in-flight child processes by `thread_ts` so `interrupt` can
    /// kill them; mirrors the remote adapter's `_active_remote_requests`
    /// keyed the same way.
    active: Arc<Mutex<HashMap<String, Arc<Mutex<Child>>>>>,
}

impl LocalEngineAdapter {
    pub fn new(binary_path: String, timeout: Duration) -> Self {
        Self {
            binary_path,
            timeout,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_command(&self, req: &EngineRequest) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&req.model);
        if let Some(session_id) = req.session_id.as_deref() {
            cmd.arg("--session-id").arg(session_id);
        }
        if let Some(system_prompt) = &req.system_prompt {
            cmd.arg("--system-prompt").arg(system_prompt);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        cmd
    }
}

#[async_trait]
impl EngineAdapter for LocalEngineAdapter {
    async fn run(
        &self,
        req: EngineRequest,
        tx: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let thread_ts = req.thread_ts.clone();
        let mut cmd = self.build_command(&req);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::EngineUnavailable(self.binary_path.clone())
            } else {
                EngineError::Io(e)
            }
        })?;

        let mut stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take();

        if let Some(stdin) = &mut stdin {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(req.prompt.as_bytes()).await?;
        }
        drop(stdin);

        let handle = Arc::new(Mutex::new(child));
        self.active.lock().await.insert(thread_ts.clone(), handle.clone());

        let mut lines = BufReader::new(stdout).lines();
        let run_result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let mut guard = handle.lock().await;
                    let _ = guard.start_kill();
                    break Ok(());
                }
                _ = tokio::time::sleep(self.timeout) => {
                    let mut guard = handle.lock().await;
                    let _ = guard.start_kill();
                    break Err(EngineError::Timeout(self.timeout.as_secs()));
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            match EngineEvent::parse_line(&line) {
                                Ok(Some(event)) => {
                                    if tx.send(event).await.is_err() {
                                        break Ok(());
                                    }
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    warn!(thread_ts = %thread_ts, error = %err, "skipping unparsable engine line");
                                }
                            }
                        }
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(EngineError::Io(err)),
                    }
                }
            }
        };

        self.active.lock().await.remove(&thread_ts);

        let status = handle.lock().await.wait().await;
        if let Ok(status) = status {
            if !status.success() {
                let mut stderr_text = String::new();
                if let Some(stderr) = &mut stderr {
                    use tokio::io::AsyncReadExt;
                    let _ = stderr.read_to_string(&mut stderr_text).await;
                }
                if run_result.is_ok() {
                    return Err(EngineError::NonZeroExit {
                        code: status.code().unwrap_or(-1),
                        stderr: stderr_text,
                    });
                }
            }
        }

        debug!(thread_ts = %thread_ts, "engine run finished");
        run_result
    }

    async fn interrupt(&self, thread_ts: &str) -> bool {
        if let Some(handle) = self.active.lock().await.get(thread_ts) {
            let mut guard = handle.lock().await;
            guard.start_kill().is_ok()
        } else {
            false
        }
    }
}
