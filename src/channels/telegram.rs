use async_trait::async_trait;
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::{
    Attachment, AttachmentKind, ChannelError, DeliveryResult, Destination, MessagingPort,
    OutboundMessage,
};
use crate::config::TelegramConfig;

#[derive(Debug, Serialize)]
struct TelegramSendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TelegramSendFile<'a> {
    chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CreateForumTopic<'a> {
    chat_id: i64,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    allowed_updates: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Telegram Bot API adapter. Private chats share the user's numeric id;
/// staff threads are forum topics inside the configured support group.
#[derive(Debug)]
pub struct TelegramAdapter {
    client: reqwest::Client,
    bot_token: String,
    support_group_id: i64,
    feedback_channel_id: Option<i64>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            support_group_id: config.support_group_id,
            feedback_channel_id: config.feedback_channel_id,
        }
    }

    async fn request<T: Serialize>(
        &self,
        method: &str,
        payload: &T,
    ) -> Result<TelegramResponse, ChannelError> {
        if self.bot_token.is_empty() {
            return Err("Telegram bot token not configured".into());
        }

        let url = format!("https://api.telegram.org/bot{}/{}", self.bot_token, method);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await?
            .json::<TelegramResponse>()
            .await?;

        if !response.ok {
            let message = response
                .description
                .unwrap_or_else(|| "Unknown Telegram API error".to_string());
            error!("Telegram API error on {}: {}", method, message);
            return Err(message.into());
        }

        Ok(response)
    }

    fn result_message_id(response: &TelegramResponse) -> Option<i64> {
        response
            .result
            .as_ref()
            .and_then(|v| v.get("message_id"))
            .and_then(|v| v.as_i64())
    }

    async fn send_text(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        text: &str,
    ) -> Result<DeliveryResult, ChannelError> {
        let payload = TelegramSendMessage {
            chat_id,
            text,
            message_thread_id: thread_id,
            parse_mode: Some("HTML"),
        };
        let response = self.request("sendMessage", &payload).await?;
        Ok(DeliveryResult {
            message_id: Self::result_message_id(&response),
        })
    }

    async fn send_file(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        attachment: &Attachment,
        caption: &str,
    ) -> Result<DeliveryResult, ChannelError> {
        let caption = (!caption.is_empty()).then_some(caption);
        let (method, payload) = match attachment.kind {
            AttachmentKind::Photo => (
                "sendPhoto",
                TelegramSendFile {
                    chat_id,
                    photo: Some(&attachment.file_id),
                    document: None,
                    caption,
                    message_thread_id: thread_id,
                },
            ),
            AttachmentKind::Document => (
                "sendDocument",
                TelegramSendFile {
                    chat_id,
                    photo: None,
                    document: Some(&attachment.file_id),
                    caption,
                    message_thread_id: thread_id,
                },
            ),
        };
        let response = self.request(method, &payload).await?;
        Ok(DeliveryResult {
            message_id: Self::result_message_id(&response),
        })
    }

    pub async fn set_webhook(&self, webhook_url: &str) -> Result<(), ChannelError> {
        let payload = SetWebhook {
            url: webhook_url,
            allowed_updates: vec!["message", "edited_message"],
        };
        self.request("setWebhook", &payload).await?;
        info!("Telegram webhook set to {}", webhook_url);
        Ok(())
    }

    pub async fn get_me(&self) -> Result<serde_json::Value, ChannelError> {
        #[derive(Serialize)]
        struct Empty {}
        let response = self.request("getMe", &Empty {}).await?;
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl MessagingPort for TelegramAdapter {
    async fn send(
        &self,
        destination: Destination,
        message: &OutboundMessage,
    ) -> Result<DeliveryResult, ChannelError> {
        let (chat_id, thread_id) = match destination {
            Destination::User(user_id) => (user_id, None),
            Destination::StaffThread(thread_id) => (self.support_group_id, Some(thread_id)),
            Destination::StaffGeneral => (self.support_group_id, None),
            Destination::FeedbackChannel => match self.feedback_channel_id {
                Some(channel_id) => (channel_id, None),
                None => return Err("feedback channel not configured".into()),
            },
        };

        match &message.attachment {
            Some(attachment) => {
                self.send_file(chat_id, thread_id, attachment, &message.text)
                    .await
            }
            None => self.send_text(chat_id, thread_id, &message.text).await,
        }
    }

    async fn create_thread(&self, title: &str) -> Result<i64, ChannelError> {
        let payload = CreateForumTopic {
            chat_id: self.support_group_id,
            name: title,
        };
        let response = self.request("createForumTopic", &payload).await?;
        let thread_id = response
            .result
            .as_ref()
            .and_then(|v| v.get("message_thread_id"))
            .and_then(|v| v.as_i64())
            .ok_or("createForumTopic returned no message_thread_id")?;
        info!("Created support topic {} ({})", thread_id, title);
        Ok(thread_id)
    }
}
