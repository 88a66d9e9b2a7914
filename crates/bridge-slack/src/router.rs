//! Mention-stripped command surface (`help`, `status`, `compact`,
//! `plugins`, `update`, `restart`). Grounded on
//! `original_source/.../slackbot/handlers/commands.py`, trimmed to what
//! this workspace actually models — no process/host administration
//! (`cleanup`, `log`, `profile`), which belongs to the CLI surface the
//! spec explicitly leaves external.

use std::sync::Arc;

use bridge_executor::{PresentationContext, Presenter, RestartManager, RunningSessionCounter};
use bridge_hooks::PluginManager;
use bridge_sessions::SessionStore;

const HELP_TEXT: &str = "\
📖 *사용법*
• `@bridge <질문>` - 질문하기 (세션 생성 + 응답)
• `@bridge help` - 도움말
• `@bridge status` - 상태 확인
• `@bridge compact` - 스레드 세션 컴팩트
• `@bridge plugins` - 로드된 플러그인 목록 (관리자)
• `@bridge update` - 봇 업데이트 (관리자)
• `@bridge restart` - 봇 재시작 (관리자)";

pub struct CommandRouter {
    sessions: Arc<SessionStore>,
    restart_manager: Arc<dyn RestartManager>,
    running_sessions: Arc<dyn RunningSessionCounter>,
    plugins: Option<Arc<PluginManager>>,
    presenter: Arc<dyn Presenter>,
}

impl CommandRouter {
    pub fn new(
        sessions: Arc<SessionStore>,
        restart_manager: Arc<dyn RestartManager>,
        running_sessions: Arc<dyn RunningSessionCounter>,
        plugins: Option<Arc<PluginManager>>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            sessions,
            restart_manager,
            running_sessions,
            plugins,
            presenter,
        }
    }

    /// Returns `true` if `text` was recognized and handled (including
    /// permission-denied replies); `false` means the caller should treat
    /// this as an ordinary prompt instead.
    pub async fn try_handle(&self, text: &str, pctx: &PresentationContext) -> bool {
        let trimmed = text.trim();
        let mut parts = trimmed.split_whitespace();
        let Some(command) = parts.next().map(str::to_lowercase) else {
            return false;
        };
        let rest: Vec<&str> = parts.collect();

        match command.as_str() {
            "help" => {
                self.reply(pctx, HELP_TEXT).await;
                true
            }
            "status" => {
                let text = format!(
                    "📊 *상태*\n• 활성 세션: {}개\n• 실행 중: {}개",
                    self.sessions.list_active().map(|s| s.len()).unwrap_or(0),
                    self.running_sessions.count(),
                );
                self.reply(pctx, &text).await;
                true
            }
            "compact" => {
                self.reply(pctx, "압축은 엔진이 컨텍스트 한도에 도달하면 자동으로 수행됩니다.").await;
                true
            }
            "plugins" => {
                if !pctx.role.is_admin() {
                    self.reply(pctx, "관리자 권한이 필요합니다.").await;
                    return true;
                }
                self.handle_plugins(pctx).await;
                true
            }
            "update" | "restart" => {
                if !pctx.role.is_admin() {
                    self.reply(pctx, "관리자 권한이 필요합니다.").await;
                    return true;
                }
                if self.running_sessions.count() > 0 || self.restart_manager.is_pending() {
                    self.restart_manager.send_confirmation_prompt(pctx).await;
                } else if command == "update" {
                    self.restart_manager.request_update().await;
                } else {
                    self.restart_manager.request_restart().await;
                }
                let _ = rest;
                true
            }
            _ => false,
        }
    }

    async fn handle_plugins(&self, pctx: &PresentationContext) {
        match &self.plugins {
            None => self.reply(pctx, "로드된 플러그인이 없습니다.").await,
            Some(plugins) => {
                let names = plugins.loaded_names().await;
                if names.is_empty() {
                    self.reply(pctx, "로드된 플러그인이 없습니다.").await;
                } else {
                    let text = format!("🔌 *로드된 플러그인*\n{}", names.join("\n"));
                    self.reply(pctx, &text).await;
                }
            }
        }
    }

    async fn reply(&self, pctx: &PresentationContext, text: &str) {
        let _ = self.presenter.post_thread_reply(pctx, text).await;
    }
}
