// ===============================
// src/telegram.rs
// ===============================
//
// Telegram Bot API via teloxide: send_message (sink) + get_updates long-poll (source).
// Cursor dikelola sendiri oleh CommandScheduler, bukan oleh dispatcher teloxide.
// RequestError teloxide tidak membawa token bot.
//
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode, Update, UpdateKind};
use tokio::time::Duration;
use tracing::{debug, error, info};

use crate::domain::{InboundMessage, UpdateBatch};
use crate::ports::{MessageSink, MessageSource, ProviderError};

#[derive(Clone, Debug)]
pub struct TelegramCfg {
    pub api_url: String,
    pub bot_token: String,
    pub long_poll_timeout: Duration,
}

/// Update -> batch. Update tanpa message (edit, callback, dsb.)
/// tetap menggeser cursor tapi tidak menghasilkan pesan.
fn batch_from_updates(updates: Vec<Update>) -> UpdateBatch {
    let next_cursor = updates.iter().map(|u| i64::from(u.id.0) + 1).max();
    let messages = updates
        .into_iter()
        .filter_map(|u| match u.kind {
            UpdateKind::Message(m) => Some(InboundMessage {
                sender_id: m.chat.id.0,
                text: m.text().unwrap_or_default().to_string(),
            }),
            _ => None,
        })
        .collect();
    UpdateBatch { messages, next_cursor }
}

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

pub struct TelegramBot {
    bot: Bot,
    long_poll_timeout: Duration,
}

impl TelegramBot {
    pub fn new(cfg: TelegramCfg) -> Result<Self, ProviderError> {
        // request timeout harus lebih panjang dari long-poll timeout
        let client = teloxide::net::default_reqwest_settings()
            .timeout(cfg.long_poll_timeout + Duration::from_secs(40))
            .build()
            .map_err(|e| ProviderError::Api(format!("telegram client: {e}")))?;
        let api_url = url::Url::parse(&cfg.api_url)
            .map_err(|e| ProviderError::Malformed(format!("telegram api url: {e}")))?;
        let bot = Bot::with_client(cfg.bot_token, client).set_api_url(api_url);
        Ok(Self { bot, long_poll_timeout: cfg.long_poll_timeout })
    }
}

#[async_trait]
impl MessageSink for TelegramBot {
    async fn send(&self, text: &str, destination: i64) -> bool {
        if destination == 0 {
            error!("invalid chat id 0, message dropped");
            return false;
        }
        let req = self
            .bot
            .send_message(ChatId(destination), text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview());
        match req.await {
            Ok(_) => {
                info!(chat_id = destination, "message sent");
                true
            }
            Err(e) => {
                error!(chat_id = destination, error = %e, "sendMessage failed");
                false
            }
        }
    }
}

#[async_trait]
impl MessageSource for TelegramBot {
    async fn poll_updates(&self, cursor: Option<i64>) -> Result<UpdateBatch, ProviderError> {
        let timeout = u32::try_from(self.long_poll_timeout.as_secs()).unwrap_or(u32::MAX);
        let mut req = self.bot.get_updates().timeout(timeout);
        if let Some(offset) = cursor {
            let offset = i32::try_from(offset)
                .map_err(|_| ProviderError::Malformed(format!("update offset out of range: {offset}")))?;
            req = req.offset(offset);
        }
        let updates = req.await?;
        let batch = batch_from_updates(updates);
        debug!(messages = batch.messages.len(), next = ?batch.next_cursor, "getUpdates");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(json: &str) -> Vec<Update> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn updates_map_to_messages_and_cursor() {
        let batch = batch_from_updates(updates(
            r#"[
            {"update_id":10,"message":{"message_id":1,"date":1700000000,
                "chat":{"id":-1001,"type":"supergroup","title":"desk"},
                "from":{"id":7,"is_bot":false,"first_name":"a"},"text":"/list"}},
            {"update_id":11,"edited_message":{"message_id":1,"date":1700000000,"edit_date":1700000001,
                "chat":{"id":-1001,"type":"supergroup","title":"desk"},
                "from":{"id":7,"is_bot":false,"first_name":"a"},"text":"x"}},
            {"update_id":12,"message":{"message_id":2,"date":1700000002,
                "chat":{"id":42,"type":"private","first_name":"b"},
                "from":{"id":42,"is_bot":false,"first_name":"b"},"text":"/add ABC"}}
        ]"#,
        ));
        assert_eq!(batch.next_cursor, Some(13));
        assert_eq!(
            batch.messages,
            vec![
                InboundMessage { sender_id: -1001, text: "/list".into() },
                InboundMessage { sender_id: 42, text: "/add ABC".into() },
            ]
        );
    }

    #[test]
    fn empty_result_keeps_cursor_unset() {
        let batch = batch_from_updates(Vec::new());
        assert!(batch.messages.is_empty());
        assert_eq!(batch.next_cursor, None);
    }

    #[tokio::test]
    async fn zero_chat_id_is_rejected_locally() {
        let bot = TelegramBot::new(TelegramCfg {
            api_url: "http://127.0.0.1:9".into(),
            bot_token: "1:x".into(),
            long_poll_timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert!(!bot.send("hi", 0).await);
    }

    #[test]
    fn bad_api_url_is_rejected() {
        let res = TelegramBot::new(TelegramCfg {
            api_url: "not a url".into(),
            bot_token: "1:x".into(),
            long_poll_timeout: Duration::from_secs(1),
        });
        assert!(matches!(res, Err(ProviderError::Malformed(_))));
    }
}
