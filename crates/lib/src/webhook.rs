//! UAZAPI webhook normalization.
//!
//! UAZAPI delivers several historically accumulated payload shapes. This
//! module reduces any of them to one `InboundMessage` (phone, text, sender
//! name, message id) or an ignore reason. Field resolution is data-driven:
//! each value comes from an ordered list of extractors tried left to right,
//! so supporting a new payload variant is a list edit, not new control flow.
//!
//! Current shape (for reference):
//! ```json
//! {
//!   "EventType": "messages",
//!   "message": {
//!     "chatid": "5517991317923@s.whatsapp.net",
//!     "text": "Hello",
//!     "fromMe": false,
//!     "senderName": "Hugo",
//!     "messageid": "3EB0..."
//!   },
//!   "chat": { "phone": "+55 17 99131-7923", "name": "Hugo" }
//! }
//! ```

use serde_json::Value;

use crate::channels::InboundMessage;

/// Sender display name used when every name field is empty.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Event-type values that carry a new incoming message.
const MESSAGE_EVENT_TYPES: &[&str] = &["messages", "messages.upsert"];

/// Messaging-domain suffixes stripped from JID-style phone fields.
const JID_SUFFIXES: &[&str] = &["@s.whatsapp.net", "@c.us", "@g.us"];

/// Result of normalizing one webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event acknowledged but not routed (with the reason echoed to the provider).
    Ignored { reason: String },
    /// A routable inbound message.
    Message(InboundMessage),
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Normalize a provider webhook body into an outcome.
///
/// Order matters: event type, then message object, then the from-self check
/// (before any other resolution, so our own outbound messages can never loop
/// back through the router), then phone, then text. Sender name and message
/// id never cause rejection.
pub fn normalize(payload: &Value) -> WebhookOutcome {
    let event_type = str_field(payload, "EventType")
        .or_else(|| str_field(payload, "event"))
        .unwrap_or_default();
    if !MESSAGE_EVENT_TYPES.contains(&event_type.as_str()) {
        return WebhookOutcome::ignored(format!("Event type: {}", event_type));
    }

    let message = message_object(payload);
    let chat = payload.get("chat").cloned().unwrap_or(Value::Null);

    if is_from_self(&message) {
        return WebhookOutcome::ignored("From self");
    }

    let phone_raw = first_non_empty(&message, &chat, PHONE_EXTRACTORS).unwrap_or_default();
    let phone = strip_jid_suffix(&phone_raw);
    if phone.is_empty() {
        log::warn!("webhook received without phone number");
        return WebhookOutcome::ignored("No phone");
    }

    let text = match first_non_empty(&message, &chat, TEXT_EXTRACTORS) {
        Some(t) => t,
        None => {
            log::info!("no text in message from {}...", prefix(&phone, 6));
            return WebhookOutcome::ignored("No text content");
        }
    };

    let sender_name = first_non_empty(&message, &chat, SENDER_NAME_EXTRACTORS)
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let message_id = first_non_empty(&message, &chat, MESSAGE_ID_EXTRACTORS);

    WebhookOutcome::Message(InboundMessage {
        phone,
        text,
        sender_name,
        message_id,
    })
}

/// Message sub-object: top-level "message", else the legacy "data.message" nesting.
fn message_object(payload: &Value) -> Value {
    match payload.get("message") {
        Some(m) if !m.is_null() && m.as_object().map_or(true, |o| !o.is_empty()) => m.clone(),
        _ => payload
            .pointer("/data/message")
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// True when the message was sent by our own instance. UAZAPI sets
/// "fromMe" on the message itself; the legacy Baileys shape nests it under
/// "key".
fn is_from_self(message: &Value) -> bool {
    message
        .get("fromMe")
        .or_else(|| message.pointer("/key/fromMe"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// One field extractor: (message, chat) -> candidate value. Returning an
/// empty string is the same as returning None.
type Extractor = fn(&Value, &Value) -> Option<String>;

/// Evaluate extractors left to right, returning the first non-empty value.
fn first_non_empty(message: &Value, chat: &Value, extractors: &[Extractor]) -> Option<String> {
    extractors
        .iter()
        .filter_map(|extract| extract(message, chat))
        .find(|s| !s.is_empty())
}

const PHONE_EXTRACTORS: &[Extractor] = &[
    |m, _| str_field(m, "chatid"),
    |m, _| str_field(m, "sender"),
    |m, _| str_field(m, "from"),
    |_, c| str_field(c, "wa_chatid"),
];

const TEXT_EXTRACTORS: &[Extractor] = &[
    |m, _| text_field(m, "text"),
    |m, _| text_field(m, "caption"),
    |m, _| text_field(m, "content"),
    |m, _| text_field(m, "body"),
    |m, _| text_field(m, "conversation"),
    |m, _| m.pointer("/extendedTextMessage/text").and_then(value_to_text),
    |m, _| text_field(m, "buttonOrListid"),
    |m, _| {
        m.pointer("/buttonsResponseMessage/selectedButtonId")
            .and_then(value_to_text)
    },
    |m, _| {
        m.pointer("/buttonsResponseMessage/selectedDisplayText")
            .and_then(value_to_text)
    },
    |m, _| {
        m.pointer("/listResponseMessage/singleSelectReply/selectedRowId")
            .and_then(value_to_text)
    },
    |m, _| m.pointer("/listResponseMessage/title").and_then(value_to_text),
];

const SENDER_NAME_EXTRACTORS: &[Extractor] = &[
    |m, _| str_field(m, "senderName"),
    |_, c| str_field(c, "name"),
    |_, c| str_field(c, "wa_name"),
];

const MESSAGE_ID_EXTRACTORS: &[Extractor] = &[
    |m, _| str_field(m, "messageid"),
    |m, _| str_field(m, "id"),
];

/// Strip one trailing messaging-domain suffix. Idempotent: the stripped
/// result contains no suffix, so a second pass is a no-op.
pub fn strip_jid_suffix(raw: &str) -> String {
    for suffix in JID_SUFFIXES {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    raw.to_string()
}

/// Plain string field (non-strings are ignored here; see `text_field` for
/// the coercing variant used on message-text candidates).
fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Text candidate field: strings pass through; other scalar/compound values
/// are coerced to their string form (UAZAPI sometimes sends objects where a
/// string is expected).
fn text_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(value_to_text)
}

fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// First `n` characters of `s` (char-safe), for log redaction.
pub fn prefix(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expect_message(outcome: WebhookOutcome) -> InboundMessage {
        match outcome {
            WebhookOutcome::Message(m) => m,
            WebhookOutcome::Ignored { reason } => panic!("unexpected ignore: {}", reason),
        }
    }

    fn expect_ignored(outcome: WebhookOutcome) -> String {
        match outcome {
            WebhookOutcome::Ignored { reason } => reason,
            WebhookOutcome::Message(m) => panic!("unexpected message: {:?}", m),
        }
    }

    #[test]
    fn current_uazapi_shape_extracts_all_fields() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "chatid": "5517991317923@s.whatsapp.net",
                "text": "Olá, quero agendar",
                "fromMe": false,
                "senderName": "Hugo Generoso",
                "messageid": "3EB0A9C5"
            },
            "chat": { "phone": "+55 17 99131-7923", "name": "Hugo Generoso" }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.phone, "5517991317923");
        assert_eq!(msg.text, "Olá, quero agendar");
        assert_eq!(msg.sender_name, "Hugo Generoso");
        assert_eq!(msg.message_id.as_deref(), Some("3EB0A9C5"));
    }

    #[test]
    fn upsert_event_with_legacy_data_nesting() {
        let payload = json!({
            "event": "messages.upsert",
            "data": {
                "message": {
                    "from": "5511988887777@c.us",
                    "body": "quanto custa botox?",
                    "key": { "fromMe": false },
                    "id": "ABCD1234"
                }
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.phone, "5511988887777");
        assert_eq!(msg.text, "quanto custa botox?");
        assert_eq!(msg.sender_name, UNKNOWN_SENDER);
        assert_eq!(msg.message_id.as_deref(), Some("ABCD1234"));
    }

    #[test]
    fn extended_text_wrapper_is_resolved() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "sender": "5511999990000@s.whatsapp.net",
                "extendedTextMessage": { "text": "mensagem com link" }
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.text, "mensagem com link");
    }

    #[test]
    fn button_reply_uses_selection_id() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "chatid": "5511999990000@s.whatsapp.net",
                "buttonOrListid": "opt_avaliacao"
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.text, "opt_avaliacao");
    }

    #[test]
    fn list_reply_uses_selected_row_id() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "chatid": "5511999990000@s.whatsapp.net",
                "listResponseMessage": {
                    "title": "Procedimentos",
                    "singleSelectReply": { "selectedRowId": "row_preenchimento" }
                }
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.text, "row_preenchimento");
    }

    #[test]
    fn non_string_text_is_coerced() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "chatid": "5511999990000@s.whatsapp.net",
                "text": 42
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.text, "42");
    }

    #[test]
    fn unrecognized_event_type_is_ignored() {
        let payload = json!({ "EventType": "presence", "message": { "text": "x" } });
        let reason = expect_ignored(normalize(&payload));
        assert_eq!(reason, "Event type: presence");
    }

    #[test]
    fn missing_event_type_is_ignored() {
        let payload = json!({ "message": { "text": "x" } });
        let reason = expect_ignored(normalize(&payload));
        assert_eq!(reason, "Event type: ");
    }

    #[test]
    fn from_self_is_ignored_before_field_resolution() {
        let payload = json!({
            "EventType": "messages",
            "message": { "fromMe": true, "chatid": "5511999990000@s.whatsapp.net", "text": "eco" }
        });
        assert_eq!(expect_ignored(normalize(&payload)), "From self");
    }

    #[test]
    fn nested_key_from_me_is_ignored() {
        let payload = json!({
            "EventType": "messages",
            "message": { "key": { "fromMe": true }, "text": "eco" }
        });
        assert_eq!(expect_ignored(normalize(&payload)), "From self");
    }

    #[test]
    fn missing_phone_is_ignored() {
        let payload = json!({
            "EventType": "messages",
            "message": { "text": "sem telefone" }
        });
        assert_eq!(expect_ignored(normalize(&payload)), "No phone");
    }

    #[test]
    fn empty_text_after_all_fallbacks_is_ignored() {
        let payload = json!({
            "EventType": "messages",
            "message": { "chatid": "5511999990000@s.whatsapp.net", "text": "" }
        });
        assert_eq!(expect_ignored(normalize(&payload)), "No text content");
    }

    #[test]
    fn phone_falls_back_to_chat_wa_chatid() {
        let payload = json!({
            "EventType": "messages",
            "message": { "text": "oi" },
            "chat": { "wa_chatid": "5511988887777@g.us" }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.phone, "5511988887777");
    }

    #[test]
    fn sender_name_falls_back_through_chat_fields() {
        let payload = json!({
            "EventType": "messages",
            "message": { "chatid": "5511999990000@s.whatsapp.net", "text": "oi" },
            "chat": { "wa_name": "Maria" }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.sender_name, "Maria");
    }

    #[test]
    fn jid_suffix_stripping_is_idempotent() {
        for raw in [
            "5517991317923@s.whatsapp.net",
            "5517991317923@c.us",
            "5517991317923@g.us",
            "5517991317923",
        ] {
            let once = strip_jid_suffix(raw);
            let twice = strip_jid_suffix(&once);
            assert_eq!(once, twice);
            assert_eq!(once, "5517991317923");
        }
    }

    #[test]
    fn text_precedence_prefers_plain_text_over_interactive() {
        let payload = json!({
            "EventType": "messages",
            "message": {
                "chatid": "5511999990000@s.whatsapp.net",
                "content": "texto plano",
                "buttonOrListid": "btn_1"
            }
        });
        let msg = expect_message(normalize(&payload));
        assert_eq!(msg.text, "texto plano");
    }
}
