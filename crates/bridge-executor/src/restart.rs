use async_trait::async_trait;

/// Forwards `UPDATE`/`RESTART` markers (§4.6) to the process lifecycle.
/// `UPDATE`/`RESTART` are only actually requested when no other sessions
/// are running; otherwise the caller should show a confirmation prompt
/// instead of calling `request_update`/`request_restart`.
#[async_trait]
pub trait RestartManager: Send + Sync {
    fn is_pending(&self) -> bool;
    async fn request_update(&self);
    async fn request_restart(&self);
    async fn send_confirmation_prompt(&self, pctx: &crate::presenter::PresentationContext);
}
