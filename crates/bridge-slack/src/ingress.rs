//! Socket Mode ingress. Routes `message`/`app_mention`/`reaction_added`/
//! `reaction_removed` push events, mirroring
//! `slackbot/handlers/message.py`'s dispatch order: channel-observer
//! collection runs unconditionally and first, command handling only
//! applies to non-bot authors, DMs get their own path, and a root
//! channel message with no `thread_ts` stops after collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use slack_morphism::prelude::*;
use tracing::{error, info, warn};

use bridge_channel_observer::{ChannelMessage, ChannelStore, ChannelTransport, MentionTracker};
use bridge_core::types::{ChannelId, EngineSessionId, SlackUserId, SourceType, ThreadTs};
use bridge_executor::{Executor, PresentationContext, Presenter, RestartManager, RunRequest};
use bridge_hooks::{HookContext, PluginManager, ON_MESSAGE, ON_REACTION};
use bridge_sessions::SessionStore;

use crate::client::SlackHyperClient;
use crate::router::CommandRouter;
use crate::types::resolve_role;

const DEDUP_TTL: Duration = Duration::from_secs(600);
const THINKING_ADMIN: &str = "🤔 생각 중...";
const THINKING_VIEWER: &str = "💭 잠시만 기다려주세요...";

/// Runs the ambient channel-observer pipeline once the pending buffer
/// warrants it. Implemented by whatever owns the LLM-backed judge and
/// digest engine, kept out of this crate since those are external
/// collaborators this crate only needs a narrow handle to.
#[async_trait]
pub trait ChannelObserverRunner: Send + Sync {
    async fn observe(&self, channel_id: &str, bot_user_id: Option<&str>, force: bool);
}

/// Builds the observational-memory injection block (§4.5.5) for a thread,
/// prepended to the prompt just before a run. Owned by whatever holds the
/// `MemoryStore`, kept out of this crate the same way `ChannelObserverRunner`
/// keeps the judge/digest engine out.
#[async_trait]
pub trait ContextInjector: Send + Sync {
    async fn build_context(&self, thread_ts: &str) -> Option<String>;
}

struct IngressState {
    presenter: Arc<dyn Presenter>,
    channel_transport: Arc<dyn ChannelTransport>,
    executor: Arc<Executor>,
    sessions: Arc<SessionStore>,
    router: Arc<CommandRouter>,
    restart_manager: Arc<dyn RestartManager>,
    plugins: Option<Arc<PluginManager>>,
    channel_store: Arc<ChannelStore>,
    mentions: Arc<MentionTracker>,
    observer: Option<Arc<dyn ChannelObserverRunner>>,
    context: Option<Arc<dyn ContextInjector>>,
    bot_user_id: String,
    admin_users: Vec<String>,
    debug_channel: Option<String>,
    trigger_word: String,
    seen_events: DashMap<String, Instant>,
}

impl IngressState {
    fn dedup(&self, key: &str) -> bool {
        let now = Instant::now();
        self.seen_events.retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_TTL);
        if self.seen_events.contains_key(key) {
            return true;
        }
        self.seen_events.insert(key.to_string(), now);
        false
    }

    fn contains_bot_mention(&self, text: &str) -> bool {
        if self.bot_user_id.is_empty() {
            text.contains("<@")
        } else {
            text.contains(&format!("<@{}>", self.bot_user_id))
        }
    }

    async fn debug_log(&self, text: &str) {
        if let Some(channel) = &self.debug_channel {
            if let Err(err) = self.channel_transport.debug_log(channel, text).await {
                warn!(%err, "failed to post debug log");
            }
        }
    }
}

pub struct SlackIngress {
    client: Arc<SlackHyperClient>,
    app_token: SlackApiToken,
    state: Arc<IngressState>,
}

impl SlackIngress {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<SlackHyperClient>,
        app_token: SlackApiToken,
        presenter: Arc<dyn Presenter>,
        channel_transport: Arc<dyn ChannelTransport>,
        executor: Arc<Executor>,
        sessions: Arc<SessionStore>,
        router: Arc<CommandRouter>,
        restart_manager: Arc<dyn RestartManager>,
        plugins: Option<Arc<PluginManager>>,
        channel_store: Arc<ChannelStore>,
        mentions: Arc<MentionTracker>,
        observer: Option<Arc<dyn ChannelObserverRunner>>,
        context: Option<Arc<dyn ContextInjector>>,
        bot_user_id: String,
        admin_users: Vec<String>,
        debug_channel: Option<String>,
        trigger_word: String,
    ) -> Self {
        Self {
            client,
            app_token,
            state: Arc::new(IngressState {
                presenter,
                channel_transport,
                executor,
                sessions,
                router,
                restart_manager,
                plugins,
                channel_store,
                mentions,
                observer,
                context,
                bot_user_id,
                admin_users,
                debug_channel,
                trigger_word,
                seen_events: DashMap::new(),
            }),
        }
    }

    /// Connects and starts serving. Returns once the handshake succeeds;
    /// the listener itself keeps running in a spawned task.
    pub async fn listen(self) -> anyhow::Result<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(self.client.clone())
                .with_error_handler(error_handler)
                .with_user_state(self.state.clone()),
        );

        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|_event, _client, _states| async move {
                info!("slack socket mode connected");
            })
            .with_push_events(handle_push_event);

        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds: SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds: SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times: SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        listener.listen_for(&self.app_token).await?;
        tokio::spawn(async move {
            listener.serve().await;
            info!("slack socket mode listener exited");
        });
        Ok(())
    }
}

fn error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    error!(error = %err, "socket mode error");
    HttpStatusCode::OK
}

async fn handle_push_event(
    event: SlackPushEventCallback,
    client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = client;
    let state = {
        let guard = states.read().await;
        guard.get_user_state::<Arc<IngressState>>().cloned()
    };
    let Some(state) = state else {
        warn!("slack push event received with no ingress state registered");
        return Ok(());
    };

    match event.event {
        SlackEventCallbackBody::Message(msg) => {
            tokio::spawn(on_message(state, msg));
        }
        SlackEventCallbackBody::AppMention(mention) => {
            tokio::spawn(on_app_mention(state, mention));
        }
        SlackEventCallbackBody::ReactionAdded(reaction) => {
            tokio::spawn(on_reaction(state, reaction.user.0, reaction.reaction, true));
        }
        SlackEventCallbackBody::ReactionRemoved(reaction) => {
            tokio::spawn(on_reaction(state, reaction.user.0, reaction.reaction, false));
        }
        other => {
            tracing::debug!(?other, "ignoring unhandled push event");
        }
    }
    Ok(())
}

async fn on_message(state: Arc<IngressState>, msg: SlackMessageEvent) {
    if msg.subtype.is_some() {
        return;
    }
    let Some(channel_id) = msg.origin.channel.as_ref().map(|c| c.0.clone()) else {
        return;
    };
    let ts = msg.origin.ts.0.clone();
    if state.dedup(&format!("msg:{channel_id}:{ts}")) {
        return;
    }
    let text = msg.content.as_ref().and_then(|c| c.text.clone()).unwrap_or_default();
    let user_id = msg.sender.user.as_ref().map(|u| u.0.clone());
    let is_bot_author = msg.sender.bot_id.is_some();
    let thread_ts = msg.origin.thread_ts.as_ref().map(|t| t.0.clone());

    // (a) collect into the channel observer unconditionally, even for the
    // bot's own messages, before any author filtering.
    collect_and_maybe_trigger(&state, &channel_id, &ts, user_id.as_deref().unwrap_or("unknown"), &text, thread_ts.as_deref()).await;

    if is_bot_author {
        return;
    }
    let Some(user_id) = user_id else {
        return;
    };

    if channel_id.starts_with('D') {
        handle_dm_message(&state, &channel_id, &user_id, &text, thread_ts.as_deref(), &ts).await;
        return;
    }

    if !text.contains("<@") {
        let ctx = HookContext::new(ON_MESSAGE, serde_json::json!({
            "channel_id": channel_id,
            "user_id": user_id,
            "text": text,
            "ts": ts,
        }));
        if let Some(plugins) = &state.plugins {
            let dispatched = plugins.dispatch(&ctx).await;
            if dispatched.stopped {
                return;
            }
        }
    }

    let Some(thread_ts) = thread_ts else {
        return;
    };
    if state.contains_bot_mention(&text) {
        return;
    }
    continue_thread(&state, &channel_id, &user_id, &text, &thread_ts, &ts).await;
}

async fn on_app_mention(state: Arc<IngressState>, mention: SlackAppMentionEvent) {
    let channel_id = mention.channel.0.clone();
    let ts = mention.origin.ts.0.clone();
    if state.dedup(&format!("mention:{channel_id}:{ts}")) {
        return;
    }
    let user_id = mention.user.0.clone();
    if user_id == state.bot_user_id {
        return;
    }
    let raw_text = mention.content.text.clone().unwrap_or_default();
    let text = strip_bot_mention(&raw_text, &state.bot_user_id);
    let is_new_root = mention.origin.thread_ts.is_none();
    let thread_ts = mention.origin.thread_ts.as_ref().map(|t| t.0.clone()).unwrap_or_else(|| ts.clone());

    state.mentions.mark(&thread_ts);

    if state.router.try_handle(&text, &provisional_ctx(&channel_id, &thread_ts, &ts, &user_id, &state)).await {
        return;
    }

    // A root-level mention (not inside an existing thread) in a channel the
    // observer already has history for is a channel-to-session promotion
    // (§3.1): the new session starts as `hybrid` so later turns in this
    // thread fold in channel messages that arrive after it.
    let has_channel_history = !channel_id.starts_with('D')
        && state
            .channel_store
            .load_judged(&channel_id)
            .map(|j| !j.is_empty())
            .unwrap_or(false);
    let source_type = if is_new_root && has_channel_history {
        SourceType::Hybrid
    } else {
        SourceType::Thread
    };

    let role = resolve_role(&user_id, &state.admin_users);
    let session = match state.sessions.get_or_create(
        &ThreadTs(thread_ts.clone()),
        &ChannelId(channel_id.clone()),
        &SlackUserId(user_id.clone()),
        &user_id,
        role,
        source_type,
    ) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to create session for mention");
            return;
        }
    };

    if source_type == SourceType::Hybrid && session.last_seen_ts.is_none() {
        if let Err(err) = state.sessions.update_last_seen_ts(&session.thread_ts, ts.clone()) {
            warn!(%err, "failed to stamp initial last_seen_ts for promoted session");
        }
    }

    run_turn(&state, session.channel_id.as_str().to_string(), session.thread_ts.as_str().to_string(), ts, text, role, session.session_id).await;
}

async fn handle_dm_message(
    state: &IngressState,
    channel_id: &str,
    user_id: &str,
    text: &str,
    thread_ts: Option<&str>,
    ts: &str,
) {
    let role = resolve_role(user_id, &state.admin_users);
    let root_ts = thread_ts.unwrap_or(ts).to_string();

    if thread_ts.is_none() {
        if state.router.try_handle(text, &provisional_ctx(channel_id, &root_ts, ts, user_id, state)).await {
            return;
        }
    }

    let session = match state.sessions.get_or_create(
        &ThreadTs(root_ts.clone()),
        &ChannelId(channel_id.to_string()),
        &SlackUserId(user_id.to_string()),
        user_id,
        role,
        SourceType::Thread,
    ) {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to create session for dm");
            return;
        }
    };

    run_turn(state, channel_id.to_string(), root_ts, ts.to_string(), text.to_string(), role, session.session_id).await;
}

async fn continue_thread(state: &IngressState, channel_id: &str, user_id: &str, text: &str, thread_ts: &str, ts: &str) {
    let session = match state.sessions.get(&ThreadTs(thread_ts.to_string())) {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(err) => {
            error!(%err, "failed to look up session");
            return;
        }
    };

    if state.restart_manager.is_pending() {
        let _ = state
            .presenter
            .post_thread_reply(
                &provisional_ctx(channel_id, thread_ts, ts, user_id, state),
                "⏳ 재시작이 예약되어 있어 잠시 후 다시 시도해주세요.",
            )
            .await;
        return;
    }

    let mut prompt = text.to_string();
    if session.source_type == SourceType::Hybrid {
        if let Some(last_seen) = &session.last_seen_ts {
            if let Ok(pending) = state.channel_store.load_pending(channel_id) {
                let followups: Vec<&ChannelMessage> = pending
                    .iter()
                    .filter(|m| m.ts.as_str() > last_seen.as_str())
                    .collect();
                if !followups.is_empty() {
                    let joined: Vec<String> = followups.iter().map(|m| format!("{}: {}", m.user, m.text)).collect();
                    prompt = format!("(채널 후속 메시지)\n{}\n\n{}", joined.join("\n"), text);
                    if let Some(newest) = followups.iter().map(|m| m.ts.as_str()).max() {
                        if let Err(err) = state.sessions.update_last_seen_ts(&session.thread_ts, newest) {
                            warn!(%err, "failed to advance last_seen_ts");
                        }
                    }
                }
            }
        }
    }

    run_turn(state, channel_id.to_string(), thread_ts.to_string(), ts.to_string(), prompt, session.role, session.session_id).await;
}

async fn run_turn(
    state: &IngressState,
    channel_id: String,
    thread_ts: String,
    msg_ts: String,
    prompt: String,
    role: bridge_core::types::UserRole,
    session_id: EngineSessionId,
) {
    let pctx = Arc::new(PresentationContext::new(
        channel_id.clone(),
        thread_ts.clone(),
        msg_ts.clone(),
        role,
        "",
        session_id.clone(),
    ));

    let placeholder_text = if role.is_admin() { THINKING_ADMIN } else { THINKING_VIEWER };
    let placeholder_ts = match state.presenter.post_placeholder(&pctx, placeholder_text).await {
        Ok(ts) => ts,
        Err(err) => {
            error!(%err, "failed to post placeholder");
            return;
        }
    };
    pctx.rebind_placeholder(placeholder_ts.clone());

    let user_message = prompt.clone();
    let full_prompt = match &state.context {
        Some(injector) => match injector.build_context(&thread_ts).await {
            Some(block) => format!("{block}\n\n{prompt}"),
            None => prompt,
        },
        None => prompt,
    };

    let req = RunRequest {
        thread_ts,
        msg_ts,
        prompt: full_prompt,
        session_id,
        role,
        user_message: Some(user_message),
        channel_id,
        placeholder_ts,
    };
    state.executor.run(req, pctx).await;
}

async fn collect_and_maybe_trigger(
    state: &IngressState,
    channel_id: &str,
    ts: &str,
    user: &str,
    text: &str,
    thread_ts: Option<&str>,
) {
    let message = ChannelMessage {
        ts: ts.to_string(),
        user: user.to_string(),
        text: text.to_string(),
        thread_ts: thread_ts.map(str::to_string),
    };
    if let Err(err) = state.channel_store.append_pending(channel_id, std::slice::from_ref(&message)) {
        warn!(%err, "failed to append pending channel message");
        return;
    }

    state.debug_log(&format!("📥 collected {channel_id}/{ts} from {user}")).await;

    let forced = !state.trigger_word.is_empty() && text.contains(&state.trigger_word);
    if let Some(observer) = &state.observer {
        let bot_user_id = if state.bot_user_id.is_empty() { None } else { Some(state.bot_user_id.as_str()) };
        observer.observe(channel_id, bot_user_id, forced).await;
    }
}

async fn on_reaction(state: Arc<IngressState>, user_id: String, reaction_name: String, added: bool) {
    let ctx = HookContext::new(ON_REACTION, serde_json::json!({
        "user_id": user_id,
        "reaction": reaction_name,
        "added": added,
    }));
    if let Some(plugins) = &state.plugins {
        let _ = plugins.dispatch(&ctx).await;
    }
}

fn strip_bot_mention(text: &str, bot_user_id: &str) -> String {
    let mention = format!("<@{bot_user_id}>");
    text.replacen(mention.as_str(), "", 1).trim_start().to_string()
}

fn provisional_ctx(channel_id: &str, thread_ts: &str, ts: &str, user_id: &str, state: &IngressState) -> PresentationContext {
    let role = resolve_role(user_id, &state.admin_users);
    PresentationContext::new(channel_id, thread_ts, ts, role, ts, EngineSessionId::empty())
}
