use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_core::marker::{escape_backticks, strip_markers};
use bridge_core::usage::context_usage_bar;
use bridge_engine::CompactTrigger;
use tracing::warn;

use crate::presenter::{PresentationContext, Presenter};
use crate::restart::RestartManager;
use crate::types::EngineCallResult;

/// Slack message body budget before a page break is forced (§4.6).
const PAGINATION_CHARS: usize = 3900;
/// Lines beyond which a channel-root response is considered "long" and
/// gets a preview + thread-reply pagination instead of an inline reply.
const SHORT_LINE_LIMIT: usize = 3;
/// Elapsed time since the last placeholder update past which the executor
/// checks for newer messages from other authors before reusing it.
const STALE_AFTER: Duration = Duration::from_secs(10);
/// Cell count for the context-window usage bar appended to a reply footer.
const USAGE_BAR_CELLS: usize = 20;

pub trait RunningSessionCounter: Send + Sync {
    fn count(&self) -> usize;
}

/// Transforms `(PresentationContext, EngineCallResult)` pairs into
/// transport calls (§4.6), dispatching marker side effects and handling
/// pagination, stale-placeholder rebinding, and the restart confirmation
/// gate.
pub struct ResultProcessor {
    presenter: Arc<dyn Presenter>,
    restart_manager: Arc<dyn RestartManager>,
    running_sessions: Arc<dyn RunningSessionCounter>,
}

impl ResultProcessor {
    pub fn new(
        presenter: Arc<dyn Presenter>,
        restart_manager: Arc<dyn RestartManager>,
        running_sessions: Arc<dyn RunningSessionCounter>,
    ) -> Self {
        Self {
            presenter,
            restart_manager,
            running_sessions,
        }
    }

    pub async fn handle_interrupted(&self, pctx: &PresentationContext) {
        if let Err(err) = self.presenter.update_placeholder(pctx, "(중단됨)").await {
            warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to render interrupted placeholder");
        }
    }

    pub async fn handle_error(&self, pctx: &PresentationContext, message: &str) {
        let text = format!("❌ {message}");
        if let Err(err) = self.presenter.update_placeholder(pctx, &text).await {
            warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to render error placeholder");
        }
    }

    pub async fn handle_exception(&self, pctx: &PresentationContext, err: &anyhow::Error) {
        self.handle_error(pctx, &err.to_string()).await;
    }

    pub async fn handle_success(&self, pctx: &PresentationContext, result: &EngineCallResult) {
        let mut body = match &result.summary {
            Some(summary) => escape_backticks(summary),
            None => escape_backticks(&strip_markers(&result.output)),
        };
        if let Some(bar) = result.usage.as_ref().and_then(|u| context_usage_bar(u, USAGE_BAR_CELLS)) {
            body = format!("{body}\n\n{bar}");
        }
        let is_root = pctx.thread_ts == pctx.msg_ts;
        let line_count = body.lines().count();

        let render = async {
            if is_root && line_count > SHORT_LINE_LIMIT {
                let preview: String = body
                    .lines()
                    .take(SHORT_LINE_LIMIT)
                    .collect::<Vec<_>>()
                    .join("\n");
                self.presenter
                    .update_placeholder(pctx, &format!("{preview}\n…"))
                    .await?;
                for page in paginate(&body, PAGINATION_CHARS) {
                    self.presenter.post_thread_reply(pctx, &page).await?;
                }
            } else if body.chars().count() > PAGINATION_CHARS {
                let mut pages = paginate(&body, PAGINATION_CHARS);
                let first = pages.remove(0);
                self.presenter.update_placeholder(pctx, &first).await?;
                for page in pages {
                    self.presenter.post_thread_reply(pctx, &page).await?;
                }
            } else {
                self.presenter.update_placeholder(pctx, &body).await?;
            }
            Ok::<(), anyhow::Error>(())
        };

        if let Err(err) = render.await {
            warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to render success response");
        }

        if let Some(details) = &result.details {
            let details = escape_backticks(details);
            for page in paginate(&details, PAGINATION_CHARS) {
                if let Err(err) = self.presenter.post_thread_reply(pctx, &page).await {
                    warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to post details follow-up");
                    break;
                }
            }
        }

        self.apply_markers(pctx, result).await;
    }

    /// Throttled progress callback (§4.2.1: at most every 2s). Performs
    /// stale-placeholder detection first: if it's been more than 10s since
    /// the last update and another author has posted in the thread since,
    /// a fresh placeholder is posted and rebound rather than reusing a
    /// message that's scrolled out of view.
    pub async fn handle_progress(
        &self,
        pctx: &PresentationContext,
        text: &str,
        last_update_at: &mut Instant,
    ) {
        if last_update_at.elapsed() < Duration::from_secs(2) {
            return;
        }

        if last_update_at.elapsed() > STALE_AFTER {
            match self
                .presenter
                .has_newer_messages(pctx, &pctx.last_msg_ts())
                .await
            {
                Ok(true) => match self.presenter.post_placeholder(pctx, text).await {
                    Ok(new_ts) => {
                        pctx.rebind_placeholder(new_ts);
                        *last_update_at = Instant::now();
                        return;
                    }
                    Err(err) => {
                        warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to post replacement placeholder");
                    }
                },
                Ok(false) => {}
                Err(err) => {
                    warn!(thread_ts = %pctx.thread_ts, error = %err, "stale-placeholder check failed");
                }
            }
        }

        if let Err(err) = self.presenter.update_placeholder(pctx, text).await {
            warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to update progress placeholder");
        }
        *last_update_at = Instant::now();
    }

    /// A compaction notification gets its own dynamic placeholder, later
    /// transitioned to "compaction complete" on the next progress tick.
    pub async fn handle_compact(&self, pctx: &PresentationContext, trigger: CompactTrigger, message: &str) {
        let label = match trigger {
            CompactTrigger::Auto => "auto-compact",
            CompactTrigger::Manual => "compact",
        };
        let text = format!("🗜️ {label}: {message}");
        if let Err(err) = self.presenter.update_placeholder(pctx, &text).await {
            warn!(thread_ts = %pctx.thread_ts, error = %err, "failed to render compaction notice");
        }
    }

    async fn apply_markers(&self, pctx: &PresentationContext, result: &EngineCallResult) {
        for path in &result.files {
            if let Err(err) = self.presenter.upload_file(pctx, path, false).await {
                warn!(thread_ts = %pctx.thread_ts, path, error = %err, "file upload failed");
            }
        }
        for path in &result.attachments {
            if let Err(err) = self.presenter.upload_file(pctx, path, true).await {
                warn!(thread_ts = %pctx.thread_ts, path, error = %err, "attachment upload failed");
            }
        }
        for prompt in &result.image_gen_prompts {
            if let Err(err) = self.presenter.request_image(pctx, prompt).await {
                warn!(thread_ts = %pctx.thread_ts, error = %err, "image generation request failed");
            }
        }
        if let Some(name) = &result.list_run {
            if let Err(err) = self.presenter.forward_list_run(name).await {
                warn!(thread_ts = %pctx.thread_ts, name, error = %err, "list-run forward failed");
            }
        }
        if result.update_requested || result.restart_requested {
            if self.running_sessions.count() > 1 || self.restart_manager.is_pending() {
                self.restart_manager.send_confirmation_prompt(pctx).await;
            } else if result.update_requested {
                self.restart_manager.request_update().await;
            } else {
                self.restart_manager.request_restart().await;
            }
        }
    }
}

/// Splits `text` into chunks no longer than `limit` chars, breaking on
/// the last newline before the boundary when one exists so pages don't
/// split mid-line.
fn paginate(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return vec![text.to_string()];
    }

    let mut pages = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            if let Some(break_at) = chars[start..end].iter().rposition(|&c| c == '\n') {
                if break_at > 0 {
                    end = start + break_at + 1;
                }
            }
        }
        pages.push(chars[start..end].iter().collect());
        start = end;
    }
    pages
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bridge_core::types::{EngineSessionId, UserRole};
    use bridge_core::usage::Usage;

    use super::*;

    struct RecordingPresenter {
        placeholders: Mutex<Vec<String>>,
        thread_replies: Mutex<Vec<String>>,
    }

    impl RecordingPresenter {
        fn new() -> Self {
            Self {
                placeholders: Mutex::new(Vec::new()),
                thread_replies: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Presenter for RecordingPresenter {
        async fn update_placeholder(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
            self.placeholders.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn post_placeholder(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<String> {
            self.placeholders.lock().unwrap().push(text.to_string());
            Ok("new-ts".to_string())
        }
        async fn post_thread_reply(&self, _pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
            self.thread_replies.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn has_newer_messages(&self, _pctx: &PresentationContext, _since_ts: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn upload_file(&self, _pctx: &PresentationContext, _path: &str, _as_attachment: bool) -> anyhow::Result<()> {
            Ok(())
        }
        async fn request_image(&self, _pctx: &PresentationContext, _prompt: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn forward_list_run(&self, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopRestartManager;

    #[async_trait]
    impl RestartManager for NoopRestartManager {
        fn is_pending(&self) -> bool {
            false
        }
        async fn request_update(&self) {}
        async fn request_restart(&self) {}
        async fn send_confirmation_prompt(&self, _pctx: &PresentationContext) {}
    }

    struct FixedRunningCount(usize);

    impl RunningSessionCounter for FixedRunningCount {
        fn count(&self) -> usize {
            self.0
        }
    }

    fn pctx() -> PresentationContext {
        PresentationContext::new("C1", "100.1", "100.1", UserRole::Viewer, "placeholder-1", EngineSessionId::empty())
    }

    fn processor(presenter: Arc<RecordingPresenter>) -> ResultProcessor {
        ResultProcessor::new(presenter, Arc::new(NoopRestartManager), Arc::new(FixedRunningCount(0)))
    }

    #[tokio::test]
    async fn summary_renders_inline_and_details_post_as_follow_up() {
        let presenter = Arc::new(RecordingPresenter::new());
        let proc = processor(presenter.clone());

        let result = EngineCallResult::from_output(
            "<!-- SUMMARY -->short version<!-- /SUMMARY --><!-- DETAILS -->the long version<!-- /DETAILS -->"
                .to_string(),
            None,
            None,
            false,
        );
        proc.handle_success(&pctx(), &result).await;

        assert_eq!(presenter.placeholders.lock().unwrap().as_slice(), ["short version"]);
        assert_eq!(presenter.thread_replies.lock().unwrap().as_slice(), ["the long version"]);
    }

    #[tokio::test]
    async fn usage_bar_is_appended_to_the_reply_footer() {
        let presenter = Arc::new(RecordingPresenter::new());
        let proc = processor(presenter.clone());

        let usage = Usage {
            input_tokens: 50_000,
            ..Default::default()
        };
        let result = EngineCallResult::from_output("done".to_string(), None, Some(usage), false);
        proc.handle_success(&pctx(), &result).await;

        let placeholders = presenter.placeholders.lock().unwrap();
        assert_eq!(placeholders.len(), 1);
        assert!(placeholders[0].starts_with("done\n\nContext | "));
    }

    #[test]
    fn paginate_short_text_is_one_page() {
        let pages = paginate("hello", 3900);
        assert_eq!(pages, vec!["hello".to_string()]);
    }

    #[test]
    fn paginate_splits_on_newline_boundary() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let pages = paginate(&text, 12);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].ends_with('\n'));
    }

    #[test]
    fn paginate_force_splits_when_no_newline() {
        let text = "x".repeat(100);
        let pages = paginate(&text, 30);
        assert_eq!(pages.iter().map(|p| p.len()).sum::<usize>(), 100);
        assert!(pages.iter().all(|p| p.len() <= 30));
    }
}
