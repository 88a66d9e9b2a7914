//! Concrete Slack transport: Socket Mode connection plus the `Presenter`
//! and `ChannelTransport` trait implementations the rest of the workspace
//! drives through.

use std::sync::Arc;

use async_trait::async_trait;
use slack_morphism::prelude::*;
use tracing::warn;

use bridge_channel_observer::ChannelTransport;
use bridge_core::config::SlackConfig;
use bridge_executor::{PresentationContext, Presenter};

use crate::error::{Result, SlackError};

pub type SlackHyperClient = SlackClient<SlackClientHyperHttpsConnector>;

/// Owns the Slack API client and bot token; every outbound call opens a
/// fresh session the way `softwaresalt-agent-intercom`'s `SlackService`
/// does, since `slack-morphism` sessions are cheap borrows over the
/// shared client.
pub struct SlackTransport {
    client: Arc<SlackHyperClient>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
}

impl SlackTransport {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| SlackError::Connector(err.to_string()))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        Ok(Self {
            client,
            bot_token,
            app_token,
        })
    }

    pub fn client(&self) -> Arc<SlackHyperClient> {
        self.client.clone()
    }

    pub fn app_token(&self) -> SlackApiToken {
        self.app_token.clone()
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    async fn post(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> anyhow::Result<String> {
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(channel.to_string()),
            content: SlackMessageContent {
                text: Some(text.to_string()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            },
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: thread_ts.map(|ts| SlackTs(ts.to_string())),
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };
        let response = self.session().chat_post_message(&request).await?;
        Ok(response.ts.to_string())
    }

    async fn update(&self, channel: &str, ts: &str, text: &str) -> anyhow::Result<()> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(channel.to_string()),
            SlackMessageContent {
                text: Some(text.to_string()),
                blocks: None,
                attachments: None,
                upload: None,
                files: None,
                reactions: None,
                metadata: None,
            },
            SlackTs(ts.to_string()),
        );
        self.session().chat_update(&request).await?;
        Ok(())
    }
}

#[async_trait]
impl Presenter for SlackTransport {
    async fn update_placeholder(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
        self.update(&pctx.channel_id, &pctx.last_msg_ts(), text).await
    }

    async fn post_placeholder(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<String> {
        self.post(&pctx.channel_id, Some(&pctx.thread_ts), text).await
    }

    async fn post_thread_reply(&self, pctx: &PresentationContext, text: &str) -> anyhow::Result<()> {
        self.post(&pctx.channel_id, Some(&pctx.thread_ts), text).await.map(|_| ())
    }

    async fn has_newer_messages(&self, pctx: &PresentationContext, since_ts: &str) -> anyhow::Result<bool> {
        let request = SlackApiConversationsRepliesRequest::new(
            SlackChannelId(pctx.channel_id.clone()),
            SlackTs(pctx.thread_ts.clone()),
        );
        let response = self.session().conversations_replies(&request).await?;
        Ok(response
            .messages
            .iter()
            .any(|msg| msg.origin.ts.0.as_str() > since_ts && msg.sender.bot_id.is_none()))
    }

    async fn upload_file(&self, pctx: &PresentationContext, path: &str, as_attachment: bool) -> anyhow::Result<()> {
        let content = tokio::fs::read(path).await?;
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let session = self.session();
        let url_request = SlackApiFilesGetUploadUrlExternalRequest::new(filename.clone(), content.len());
        let url_response = session.get_upload_url_external(&url_request).await?;

        let http = reqwest::Client::new();
        http.post(url_response.upload_url.0.to_string())
            .body(content)
            .send()
            .await?
            .error_for_status()?;

        let file_ref = SlackApiFilesComplete {
            id: url_response.file_id,
            title: Some(filename),
        };
        let mut complete = SlackApiFilesCompleteUploadExternalRequest::new(vec![file_ref]);
        complete.channel_id = Some(SlackChannelId(pctx.channel_id.clone()));
        complete.thread_ts = Some(SlackTs(pctx.thread_ts.clone()));
        session.files_complete_upload_external(&complete).await?;

        if as_attachment {
            self.post(&pctx.channel_id, Some(&pctx.thread_ts), "📎 attachment uploaded above").await?;
        }
        Ok(())
    }

    async fn request_image(&self, pctx: &PresentationContext, prompt: &str) -> anyhow::Result<()> {
        self.post(
            &pctx.channel_id,
            Some(&pctx.thread_ts),
            &format!("🎨 image requested: {prompt}"),
        )
        .await
        .map(|_| ())
    }

    async fn forward_list_run(&self, name: &str) -> anyhow::Result<()> {
        warn!(name, "list-run forwarding has no registered handler in this transport");
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for SlackTransport {
    async fn react(&self, channel_id: &str, ts: &str, emoji: &str) -> anyhow::Result<()> {
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(channel_id.to_string()),
            SlackReactionName(emoji.to_string()),
            SlackTs(ts.to_string()),
        );
        self.session().reactions_add(&request).await?;
        Ok(())
    }

    async fn post_message(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> anyhow::Result<()> {
        self.post(channel_id, thread_ts, text).await.map(|_| ())
    }

    async fn debug_log(&self, debug_channel: &str, text: &str) -> anyhow::Result<()> {
        self.post(debug_channel, None, text).await.map(|_| ())
    }
}
