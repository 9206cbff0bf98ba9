//! Inbound message from a channel: delivered to the gateway for session/agent handling.

use async_trait::async_trait;

/// A normalized message from a channel, keyed by the sender's phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Digits-only phone identifier (JID suffix already stripped).
    pub phone: String,
    pub text: String,
    pub sender_name: String,
    /// Provider message id, when the payload carried one.
    pub message_id: Option<String>,
}

/// Routes one inbound message to a reply. The gateway holds this behind a
/// trait object so tests can swap in a canned router.
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, message: &InboundMessage) -> anyhow::Result<String>;
}
