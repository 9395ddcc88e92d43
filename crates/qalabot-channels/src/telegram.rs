//! Telegram Bot API channel.
//!
//! Uses long polling via `getUpdates`; replies go out with `sendMessage`,
//! optionally carrying an inline keyboard. Button presses arrive as
//! `callback_query` updates and are acknowledged with `answerCallbackQuery`.
//! Docs: <https://core.telegram.org/bots/api>

use async_trait::async_trait;
use qalabot_core::{
    config::TelegramConfig,
    error::QalaError,
    traits::Channel,
    update::{Location, PhotoRef, Reply, Update},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Telegram message length limit.
const MESSAGE_LIMIT: usize = 4096;

/// Telegram channel using the Bot API with long polling.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
    base_url: String,
    /// Tracks the last update_id to avoid reprocessing.
    last_update_id: Arc<Mutex<Option<i64>>>,
}

// --- Telegram API types ---

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    location: Option<TgLocation>,
    photo: Option<Vec<TgPhotoSize>>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    message: Option<TgMessage>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TgPhotoSize {
    file_id: String,
    width: i64,
    height: i64,
    file_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TgUser {
    id: i64,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

impl TelegramChannel {
    /// Create a new Telegram channel from config.
    pub fn new(config: TelegramConfig) -> Self {
        let base_url = format!("https://api.telegram.org/bot{}", config.bot_token);
        Self {
            config,
            client: reqwest::Client::new(),
            base_url,
            last_update_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Send a text message, chunked at Telegram's length limit, with an
    /// inline keyboard on the final chunk if buttons were given.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[qalabot_core::update::Button],
    ) -> Result<(), QalaError> {
        let chunks = split_message(text, MESSAGE_LIMIT);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let url = format!("{}/sendMessage", self.base_url);
            let mut body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            if i == last && !buttons.is_empty() {
                body["reply_markup"] = inline_keyboard(buttons);
            }

            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| QalaError::Channel(format!("telegram send failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let error_text = resp.text().await.unwrap_or_default();
                return Err(QalaError::Channel(format!(
                    "telegram send got {status}: {error_text}"
                )));
            }
        }

        Ok(())
    }

    /// Register bot commands with Telegram so users see an autocomplete menu.
    /// Best-effort: logs failures but does not propagate errors.
    async fn register_commands(&self) {
        let commands = serde_json::json!({
            "commands": [
                { "command": "report", "description": "Report a city problem" },
                { "command": "register", "description": "Register with your name and phone" },
                { "command": "events", "description": "Browse community events" },
                { "command": "cancel", "description": "Cancel the current flow" },
                { "command": "help", "description": "Show what I can do" },
            ]
        });

        let url = format!("{}/setMyCommands", self.base_url);
        match self.client.post(&url).json(&commands).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("registered Telegram bot commands");
            }
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                warn!("failed to register Telegram bot commands: {body}");
            }
            Err(e) => {
                warn!("failed to register Telegram bot commands: {e}");
            }
        }
    }

    /// Send a chat action (e.g. "typing") to a chat.
    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), QalaError> {
        let url = format!("{}/sendChatAction", self.base_url);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "action": action,
        });

        self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| QalaError::Channel(format!("telegram sendChatAction failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<mpsc::Receiver<Update>, QalaError> {
        self.register_commands().await;

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let bot_token = self.config.bot_token.clone();
        let last_update_id = self.last_update_id.clone();

        info!("Telegram channel starting long polling...");

        tokio::spawn(async move {
            let mut backoff_secs: u64 = 1;

            loop {
                let last = last_update_id.lock().await;
                let offset = last.map(|id| id + 1);
                drop(last);

                let mut url = format!("{base_url}/getUpdates?timeout=30");
                if let Some(off) = offset {
                    url.push_str(&format!("&offset={off}"));
                }

                let resp = match client
                    .get(&url)
                    .timeout(std::time::Duration::from_secs(35))
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        error!("telegram poll error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(60);
                        continue;
                    }
                };

                let body: TgResponse<Vec<TgUpdate>> = match resp.json().await {
                    Ok(b) => b,
                    Err(e) => {
                        error!("telegram parse error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(60);
                        continue;
                    }
                };

                if !body.ok {
                    error!(
                        "telegram API error (retry in {backoff_secs}s): {}",
                        body.description.unwrap_or_default()
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(60);
                    continue;
                }

                // Successful poll — reset backoff.
                backoff_secs = 1;

                let updates = body.result.unwrap_or_default();

                if let Some(last_update) = updates.last() {
                    *last_update_id.lock().await = Some(last_update.update_id);
                }

                for tg_update in updates {
                    let update = if let Some(cb) = tg_update.callback_query {
                        // Ack first so the client spinner clears even if
                        // the engine takes a while.
                        let ack_url = format!("{base_url}/answerCallbackQuery");
                        let ack = serde_json::json!({ "callback_query_id": cb.id });
                        if let Err(e) = client.post(&ack_url).json(&ack).send().await {
                            debug!("telegram answerCallbackQuery failed: {e}");
                        }
                        callback_to_update(cb)
                    } else if let Some(msg) = tg_update.message {
                        let photo = match &msg.photo {
                            // Telegram sends multiple sizes; the last is the largest.
                            Some(sizes) => match sizes.last() {
                                Some(largest) => {
                                    match resolve_file_url(
                                        &client,
                                        &base_url,
                                        &bot_token,
                                        &largest.file_id,
                                    )
                                    .await
                                    {
                                        Ok(url) => Some(PhotoRef {
                                            file_id: largest.file_id.clone(),
                                            url,
                                        }),
                                        Err(e) => {
                                            warn!("photo resolve failed: {e}");
                                            None
                                        }
                                    }
                                }
                                None => None,
                            },
                            None => None,
                        };
                        message_to_update(msg, photo)
                    } else {
                        continue;
                    };

                    let Some(update) = update else { continue };

                    if tx.send(update).await.is_err() {
                        info!("telegram channel receiver dropped, stopping poll");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, reply: Reply) -> Result<(), QalaError> {
        let chat_id_str = reply
            .reply_target
            .as_deref()
            .ok_or_else(|| QalaError::Channel("no reply_target on outgoing reply".into()))?;

        let chat_id: i64 = chat_id_str.parse().map_err(|e| {
            QalaError::Channel(format!("invalid telegram chat_id '{chat_id_str}': {e}"))
        })?;

        self.send_message(chat_id, &reply.text, &reply.buttons).await
    }

    async fn send_typing(&self, target: &str) -> Result<(), QalaError> {
        let chat_id: i64 = target
            .parse()
            .map_err(|e| QalaError::Channel(format!("invalid telegram chat_id '{target}': {e}")))?;
        self.send_chat_action(chat_id, "typing").await
    }

    async fn stop(&self) -> Result<(), QalaError> {
        info!("Telegram channel stopped");
        Ok(())
    }
}

/// Convert a plain Telegram message to an engine update.
fn message_to_update(msg: TgMessage, photo: Option<PhotoRef>) -> Option<Update> {
    let user = msg.from?;

    let text = msg.text.or(msg.caption);
    let location = msg.location.map(|l| Location {
        latitude: l.latitude,
        longitude: l.longitude,
    });

    // Nothing the engine can act on.
    if text.is_none() && location.is_none() && photo.is_none() {
        return None;
    }

    Some(Update {
        id: Uuid::new_v4(),
        channel: "telegram".to_string(),
        transport_id: user.id.to_string(),
        sender_name: Some(display_name(&user)),
        text,
        callback: None,
        location,
        photo,
        timestamp: chrono::Utc::now(),
        reply_target: Some(msg.chat.id.to_string()),
    })
}

/// Convert a callback query (button press) to an engine update.
fn callback_to_update(cb: TgCallbackQuery) -> Option<Update> {
    let payload = cb.data?;
    let chat_id = cb.message.as_ref().map(|m| m.chat.id.to_string());

    Some(Update {
        id: Uuid::new_v4(),
        channel: "telegram".to_string(),
        transport_id: cb.from.id.to_string(),
        sender_name: Some(display_name(&cb.from)),
        text: None,
        callback: Some(payload),
        location: None,
        photo: None,
        timestamp: chrono::Utc::now(),
        reply_target: chat_id,
    })
}

fn display_name(user: &TgUser) -> String {
    if let Some(ref un) = user.username {
        format!("@{un}")
    } else if let Some(ref ln) = user.last_name {
        format!("{} {ln}", user.first_name)
    } else {
        user.first_name.clone()
    }
}

/// Build an `inline_keyboard` reply markup, one button per row.
fn inline_keyboard(buttons: &[qalabot_core::update::Button]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = buttons
        .iter()
        .map(|b| {
            serde_json::json!([{
                "text": b.label,
                "callback_data": b.payload,
            }])
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

/// Resolve a Telegram file_id to a downloadable file URL via `getFile`.
async fn resolve_file_url(
    client: &reqwest::Client,
    base_url: &str,
    bot_token: &str,
    file_id: &str,
) -> Result<String, QalaError> {
    let url = format!("{base_url}/getFile?file_id={file_id}");
    let resp: TgResponse<TgFile> = client
        .get(&url)
        .send()
        .await
        .map_err(|e| QalaError::Channel(format!("telegram getFile failed: {e}")))?
        .json()
        .await
        .map_err(|e| QalaError::Channel(format!("telegram getFile parse failed: {e}")))?;

    let file_path = resp
        .result
        .and_then(|f| f.file_path)
        .ok_or_else(|| QalaError::Channel("telegram getFile returned no file_path".into()))?;

    Ok(format!(
        "https://api.telegram.org/file/bot{bot_token}/{file_path}"
    ))
}

/// Split a long message into chunks that respect Telegram's limit.
fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // The byte limit may land inside a multi-byte character.
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
