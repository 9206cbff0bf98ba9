//! WhatsApp channel: outbound messaging via the UAZAPI instance API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::webhook::prefix;

/// Typing-indicator delay sent with every message, in milliseconds. UAZAPI
/// shows "typing..." for this long before delivering, which paces replies
/// like a human attendant.
const SEND_DELAY_MS: u64 = 2000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("uazapi not configured (UAZAPI_BASE_URL or UAZAPI_INSTANCE_TOKEN missing)")]
    NotConfigured,
    #[error("uazapi request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("uazapi returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Interactive menu style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    List,
    Buttons,
}

impl MenuKind {
    fn as_str(&self) -> &'static str {
        match self {
            MenuKind::List => "list",
            MenuKind::Buttons => "buttons",
        }
    }
}

/// UAZAPI client for one WhatsApp instance.
pub struct WhatsAppChannel {
    base_url: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), WhatsAppError> {
        match (self.base_url.as_deref(), self.token.as_deref()) {
            (Some(base), Some(token)) if !base.is_empty() && !token.is_empty() => {
                Ok((base, token))
            }
            _ => Err(WhatsAppError::NotConfigured),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), WhatsAppError> {
        let (base, token) = self.credentials()?;
        let res = self
            .client
            .post(format!("{}{}", base, path))
            .header("token", token)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            let body = prefix(&body, 200);
            return Err(WhatsAppError::Api { status, body });
        }
        Ok(())
    }

    /// Send a plain text message.
    pub async fn send_text(&self, phone: &str, text: &str) -> Result<(), WhatsAppError> {
        self.post(
            "/send/text",
            json!({
                "number": phone,
                "text": text,
                "delay": SEND_DELAY_MS,
                "readchat": true,
            }),
        )
        .await?;
        log::info!("whatsapp message sent to {}...", prefix(phone, 6));
        Ok(())
    }

    /// Send an interactive menu (list or buttons).
    pub async fn send_menu(
        &self,
        phone: &str,
        kind: MenuKind,
        text: &str,
        button_text: &str,
        choices: &[String],
    ) -> Result<(), WhatsAppError> {
        self.post(
            "/send/menu",
            json!({
                "number": phone,
                "type": kind.as_str(),
                "text": text,
                "listButton": button_text,
                "choices": choices,
                "delay": SEND_DELAY_MS,
                "readchat": true,
            }),
        )
        .await?;
        log::info!("whatsapp menu sent to {}...", prefix(phone, 6));
        Ok(())
    }

    /// Mark an inbound message as read. Advisory only: runs detached, and a
    /// failure is logged but never reaches the caller.
    pub fn spawn_mark_read(self: Arc<Self>, message_id: String) {
        let channel = self;
        tokio::spawn(async move {
            if let Err(e) = channel
                .post("/message/markread", json!({ "id": [message_id] }))
                .await
            {
                log::warn!("mark-read failed: {}", e);
            }
        });
    }
}
