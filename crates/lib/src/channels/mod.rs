//! Communication channels (WhatsApp via UAZAPI).
//!
//! Inbound messages arrive as provider webhooks, get normalized, and are
//! routed to the agent; replies go back out through the channel's send API.

mod inbound;
mod whatsapp;

pub use inbound::{InboundMessage, Router};
pub use whatsapp::{MenuKind, WhatsAppChannel, WhatsAppError};
