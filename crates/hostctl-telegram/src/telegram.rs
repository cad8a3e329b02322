//! Telegram Bot API client
//!
//! Long-polls `getUpdates` and turns `/command` messages into [`Command`]s.
//! Offsets are tracked in memory; Telegram forgets an update once a later
//! `getUpdates` call passes an offset above its ID.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hostctl_proto::{CallerId, Command, ProtocolError, Reply};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::transport::{Inbound, Transport};
use crate::{Result, TransportError};

/// Public Bot API endpoint
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Long-poll timeout
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time allowed on top of the poll timeout for the HTTP round trip
const REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Telegram rejects longer message texts
const MAX_TEXT: usize = 4096;

/// Telegram rejects longer photo captions
const MAX_CAPTION: usize = 1024;

/// Telegram Bot API transport
pub struct TelegramTransport {
    /// HTTP client
    client: Client,
    /// API base URL, without trailing slash
    api_url: String,
    /// Bot token
    token: String,
    /// Next update ID to request
    offset: AtomicI64,
    /// Long-poll timeout
    poll_timeout: Duration,
}

impl fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("offset", &self.offset.load(Ordering::Relaxed))
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl TelegramTransport {
    /// Transport for the public Bot API
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            offset: AtomicI64::new(0),
            poll_timeout: POLL_TIMEOUT,
        })
    }

    /// Use another API endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use another long-poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Next update ID that will be requested
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Skip updates that arrived while the agent was down
    pub async fn drop_pending(&self) -> Result<()> {
        let updates: Vec<Update> = self
            .call_get("getUpdates", &[("offset", "-1".to_string()), ("timeout", "0".to_string())], None)
            .await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.advance(last);
            info!("Dropped pending updates up to {}", last);
        }
        Ok(())
    }

    fn api_endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn advance(&self, update_id: i64) {
        self.offset.fetch_max(update_id + 1, Ordering::SeqCst);
    }

    async fn call_get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.client.get(self.api_endpoint(method)).query(query);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        unwrap_response(method, response.json().await?)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "text": truncate(text, MAX_TEXT),
        });

        let response = self
            .client
            .post(self.api_endpoint("sendMessage"))
            .json(&payload)
            .send()
            .await?;
        let _: serde_json::Value = unwrap_response("sendMessage", response.json().await?)?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, bytes: &[u8], caption: &str) -> Result<()> {
        let file_name = if bytes.starts_with(b"\x89PNG") {
            "capture.png"
        } else {
            "capture.jpg"
        };
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate(caption, MAX_CAPTION))
            .part("photo", Part::bytes(bytes.to_vec()).file_name(file_name));

        let response = self
            .client
            .post(self.api_endpoint("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = unwrap_response("sendPhoto", response.json().await?)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn next_commands(&self) -> Result<Vec<Inbound>> {
        let query = [
            ("offset", self.offset().to_string()),
            ("timeout", self.poll_timeout.as_secs().to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        let updates: Vec<Update> = self
            .call_get("getUpdates", &query, Some(self.poll_timeout + REQUEST_SLACK))
            .await?;

        let mut inbound = Vec::new();
        for update in updates {
            self.advance(update.update_id);
            if let Some(command) = update.into_inbound() {
                inbound.push(command);
            }
        }
        Ok(inbound)
    }

    async fn send(&self, chat_id: i64, reply: &Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => self.send_text(chat_id, text).await,
            Reply::Photo { bytes, caption } => self.send_photo(chat_id, bytes, caption).await,
        }
    }

    async fn acknowledge(&self) -> Result<()> {
        let query = [
            ("offset", self.offset().to_string()),
            ("timeout", "0".to_string()),
            ("limit", "1".to_string()),
        ];
        let _: Vec<Update> = self.call_get("getUpdates", &query, None).await?;
        debug!("Acknowledged updates below {}", self.offset());
        Ok(())
    }
}

fn unwrap_response<T>(method: &str, envelope: ApiResponse<T>) -> Result<T> {
    if !envelope.ok {
        return Err(TransportError::Api {
            code: envelope.error_code.unwrap_or_default(),
            description: envelope
                .description
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    envelope
        .result
        .ok_or_else(|| TransportError::Malformed(format!("{} response missing result", method)))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            warn!("Truncating outgoing text of {} chars", text.chars().count());
            text[..cut].to_string()
        }
        None => text.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

impl Update {
    fn into_inbound(self) -> Option<Inbound> {
        let message = self.message?;
        let text = message.text?;
        let from = message.from?;

        match Command::parse(&text, CallerId(from.id)) {
            Ok(command) => Some(Inbound {
                chat_id: message.chat.id,
                command,
            }),
            Err(ProtocolError::NotACommand) => None,
            Err(ProtocolError::UnknownCommand(name)) => {
                debug!("Ignoring unknown command /{} from {}", name, from.id);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    from: Option<User>,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[cfg(test)]
mod tests;
