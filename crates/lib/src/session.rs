//! Conversation session and message history for the agent loop.
//!
//! Sessions are keyed by the patient's phone number, so every webhook from
//! the same number lands in the same conversation. The store is in-memory;
//! a gateway restart starts conversations fresh.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unique session identifier (derived from the phone number).
pub type SessionId = String;

/// A single message in a session (user/assistant/system/tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    /// When role is "assistant", optional tool calls from the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<crate::llm::ToolCall>>,
    /// When role is "tool", the name of the tool this result is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl SessionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }
}

/// A session: id, patient display name, and ordered message history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub sender_name: String,
    pub messages: Vec<SessionMessage>,
}

/// In-memory store for sessions (get-or-create, get, append).
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Session id for a phone number.
pub fn session_id_for_phone(phone: &str) -> SessionId {
    format!("wa-{}", phone)
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Find or create the session for a phone number. A single write lock
    /// covers the lookup and the insert, so two concurrent webhooks from the
    /// same number cannot each create a session and clobber the other's
    /// history.
    pub async fn get_or_create(&self, phone: &str, sender_name: &str) -> SessionId {
        let id = session_id_for_phone(phone);
        let mut g = self.inner.write().await;
        let session = g.entry(id.clone()).or_insert_with(|| {
            log::info!("new session {} for {}", id, sender_name);
            Session {
                id: id.clone(),
                sender_name: sender_name.to_string(),
                messages: Vec::new(),
            }
        });
        // Keep the display name current; the provider can learn it late.
        if !sender_name.is_empty() && sender_name != session.sender_name {
            session.sender_name = sender_name.to_string();
        }
        id
    }

    /// Return a clone of the session if it exists.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().await.get(id).cloned()
    }

    /// Append a message to the session; returns error if session not found.
    pub async fn append_message(
        &self,
        id: &str,
        message: SessionMessage,
    ) -> Result<(), String> {
        let mut g = self.inner.write().await;
        let session = g.get_mut(id).ok_or_else(|| "session not found".to_string())?;
        session.messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_phone_reuses_the_session() {
        let store = SessionStore::new();
        let a = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&a, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        let b = store.get_or_create("5511999990000", "Maria").await;
        assert_eq!(a, b);
        let session = store.get(&b).await.expect("session exists");
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_session() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = store.get_or_create("5517991317923", "Hugo").await;
                store
                    .append_message(&id, SessionMessage::user("oi"))
                    .await
                    .expect("session exists");
                id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.expect("task completes"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        let session = store.get(&ids[0]).await.expect("session exists");
        assert_eq!(session.messages.len(), 16);
    }

    #[tokio::test]
    async fn sender_name_is_refreshed() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Unknown").await;
        store.get_or_create("5511999990000", "Maria Silva").await;
        let session = store.get(&id).await.expect("session exists");
        assert_eq!(session.sender_name, "Maria Silva");
    }

    #[tokio::test]
    async fn append_to_missing_session_errors() {
        let store = SessionStore::new();
        let err = store
            .append_message("wa-0000", SessionMessage::user("oi"))
            .await
            .expect_err("no session");
        assert_eq!(err, "session not found");
    }
}
