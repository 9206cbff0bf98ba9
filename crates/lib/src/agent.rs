//! Agent turn: load session history, call the LLM, execute tool calls,
//! append everything back to the session.
//!
//! When the model returns tool_calls we execute them and re-call the model
//! until it answers in plain text or the iteration cap is hit.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channels::{InboundMessage, Router};
use crate::llm::{ChatMessage, LlmBackend, LlmError, ToolCall, ToolDefinition};
use crate::session::{SessionMessage, SessionStore};
use crate::tools::{clinic_tool_definitions, ClinicToolExecutor, ClinicTools};

const MAX_TOOL_LOOP: usize = 5;

/// Fallback reply when the model ends a turn with no text content.
const EMPTY_REPLY_FALLBACK: &str =
    "Desculpe, não consegui processar sua mensagem. Pode repetir, por favor?";

/// Result of one agent turn: final text content and any tool calls from the
/// last assistant message.
#[derive(Debug, Clone)]
pub struct AgentTurnResult {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Executes a tool by name and JSON arguments. Returns output or error
/// string. Async because clinic tools are HTTP calls.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String>;
}

/// Run one agent turn: load session messages, call the LLM backend; if the
/// model returns tool_calls, execute them and re-call until no more
/// tool_calls or max iterations.
pub async fn run_turn<B: LlmBackend + ?Sized>(
    store: &SessionStore,
    session_id: &str,
    backend: &B,
    system_context: Option<&str>,
    tools: Option<Vec<ToolDefinition>>,
    tool_executor: Option<&dyn ToolExecutor>,
) -> Result<AgentTurnResult, LlmError> {
    let session = store
        .get(session_id)
        .await
        .ok_or_else(|| LlmError::Session("session not found".to_string()))?;

    let mut messages: Vec<ChatMessage> = session
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            tool_name: m.tool_name.clone(),
        })
        .collect();

    if let Some(ctx) = system_context {
        if !ctx.trim().is_empty() {
            messages.insert(
                0,
                ChatMessage {
                    role: "system".to_string(),
                    content: ctx.to_string(),
                    tool_calls: None,
                    tool_name: None,
                },
            );
        }
    }

    let tools_ref = tools.as_ref();
    let mut loop_count = 0;
    let mut last_content;
    let mut last_tool_calls;

    loop {
        let res = backend.chat(messages.clone(), tools_ref.cloned()).await?;
        last_content = res.content().to_string();
        last_tool_calls = res.tool_calls().to_vec();

        let assistant_msg = ChatMessage {
            role: "assistant".to_string(),
            content: last_content.clone(),
            tool_calls: if last_tool_calls.is_empty() {
                None
            } else {
                Some(last_tool_calls.clone())
            },
            tool_name: None,
        };

        store
            .append_message(
                session_id,
                SessionMessage {
                    role: "assistant".to_string(),
                    content: assistant_msg.content.clone(),
                    tool_calls: assistant_msg.tool_calls.clone(),
                    tool_name: None,
                },
            )
            .await
            .map_err(LlmError::Session)?;

        if last_tool_calls.is_empty() {
            break;
        }

        loop_count += 1;
        let executor = match tool_executor {
            Some(e) if loop_count < MAX_TOOL_LOOP => e,
            _ => {
                // An assistant message with tool_calls must be followed by
                // tool results, or the replayed history is invalid for every
                // later turn. Record an error result per pending call.
                let reason = if tool_executor.is_none() {
                    log::debug!("agent: tool_calls returned but no executor");
                    "error: no tool executor available"
                } else {
                    log::debug!("agent: max tool loop iterations reached");
                    "error: tool loop limit reached"
                };
                for call in &last_tool_calls {
                    store
                        .append_message(
                            session_id,
                            SessionMessage {
                                role: "tool".to_string(),
                                content: reason.to_string(),
                                tool_calls: None,
                                tool_name: Some(call.function.name.clone()),
                            },
                        )
                        .await
                        .map_err(LlmError::Session)?;
                }
                break;
            }
        };

        messages.push(assistant_msg);
        for call in &last_tool_calls {
            let name = call.function.name.as_str();
            let args = &call.function.arguments;
            let result = match executor.execute(name, args).await {
                Ok(out) => out,
                Err(e) => {
                    log::warn!("agent: tool {} failed: {}", name, e);
                    format!("error: {}", e)
                }
            };
            messages.push(ChatMessage {
                role: "tool".to_string(),
                content: result.clone(),
                tool_calls: None,
                tool_name: Some(name.to_string()),
            });
            store
                .append_message(
                    session_id,
                    SessionMessage {
                        role: "tool".to_string(),
                        content: result,
                        tool_calls: None,
                        tool_name: Some(name.to_string()),
                    },
                )
                .await
                .map_err(LlmError::Session)?;
        }
    }

    Ok(AgentTurnResult {
        content: last_content,
        tool_calls: last_tool_calls,
    })
}

/// The production router: one session per phone, clinic tools bound to the
/// conversation, reply text returned to the gateway.
pub struct AgentRouter {
    store: SessionStore,
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ClinicTools>,
    system_prompt: Option<String>,
}

impl AgentRouter {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ClinicTools>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            backend,
            tools,
            system_prompt,
        }
    }
}

#[async_trait]
impl Router for AgentRouter {
    async fn route(&self, message: &InboundMessage) -> anyhow::Result<String> {
        let session_id = self
            .store
            .get_or_create(&message.phone, &message.sender_name)
            .await;
        self.store
            .append_message(&session_id, SessionMessage::user(&message.text))
            .await
            .map_err(anyhow::Error::msg)?;

        let executor =
            ClinicToolExecutor::new(Arc::clone(&self.tools), message.phone.clone());
        let result = run_turn(
            &self.store,
            &session_id,
            self.backend.as_ref(),
            self.system_prompt.as_deref(),
            Some(clinic_tool_definitions()),
            Some(&executor),
        )
        .await?;

        if result.content.trim().is_empty() {
            log::warn!("agent returned empty content for session {}", session_id);
            return Ok(EMPTY_REPLY_FALLBACK.to_string());
        }
        Ok(result.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarClient;
    use crate::channels::WhatsAppChannel;
    use crate::contacts::ContactStore;
    use crate::knowledge::KnowledgeBase;
    use crate::llm::{ChatResponse, ToolCallFunction};
    use std::sync::Mutex;

    /// Backend scripted with a fixed list of responses, returned in order.
    struct ScriptedBackend {
        responses: Mutex<Vec<ChatResponse>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn chat(
            &self,
            messages: Vec<ChatMessage>,
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.lock().expect("lock").push(messages);
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(LlmError::Api("script exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(
            &self,
            name: &str,
            _args: &serde_json::Value,
        ) -> Result<String, String> {
            Ok(format!("result of {}", name))
        }
    }

    fn text(content: &str) -> ChatResponse {
        ChatResponse {
            message: Some(ChatMessage {
                role: "assistant".to_string(),
                content: content.to_string(),
                tool_calls: None,
                tool_name: None,
            }),
        }
    }

    fn tool_call(name: &str) -> ChatResponse {
        ChatResponse {
            message: Some(ChatMessage {
                role: "assistant".to_string(),
                content: String::new(),
                tool_calls: Some(vec![ToolCall {
                    typ: "function".to_string(),
                    function: ToolCallFunction {
                        name: name.to_string(),
                        arguments: serde_json::json!({}),
                    },
                }]),
                tool_name: None,
            }),
        }
    }

    #[tokio::test]
    async fn plain_answer_runs_a_single_iteration() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        let backend = ScriptedBackend::new(vec![text("Olá! Como posso ajudar?")]);

        let result = run_turn(&store, &id, &backend, Some("prompt"), None, None)
            .await
            .expect("turn completes");
        assert_eq!(result.content, "Olá! Como posso ajudar?");
        assert_eq!(backend.calls.lock().expect("lock").len(), 1);
        // System prompt is injected ahead of the history.
        assert_eq!(backend.calls.lock().expect("lock")[0][0].role, "system");
    }

    #[tokio::test]
    async fn tool_calls_are_executed_and_fed_back() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("tem horário amanhã?"))
            .await
            .expect("session exists");
        let backend = ScriptedBackend::new(vec![
            tool_call("calendar_search"),
            text("Temos Segunda às 09:00."),
        ]);

        let result = run_turn(&store, &id, &backend, None, None, Some(&EchoExecutor))
            .await
            .expect("turn completes");
        assert_eq!(result.content, "Temos Segunda às 09:00.");

        let calls = backend.calls.lock().expect("lock");
        assert_eq!(calls.len(), 2);
        let second = &calls[1];
        let tool_msg = second.iter().find(|m| m.role == "tool").expect("tool msg");
        assert_eq!(tool_msg.content, "result of calendar_search");
        assert_eq!(tool_msg.tool_name.as_deref(), Some("calendar_search"));

        // Session history recorded assistant + tool + final assistant.
        let session = store.get(&id).await.expect("session exists");
        let roles: Vec<&str> = session.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "tool", "assistant"]);
    }

    #[tokio::test]
    async fn tool_loop_stops_at_cap() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        // Model that never stops asking for tools.
        let backend = ScriptedBackend::new(vec![
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
        ]);

        let result = run_turn(&store, &id, &backend, None, None, Some(&EchoExecutor))
            .await
            .expect("turn completes");
        assert!(result.content.is_empty());
        assert_eq!(backend.calls.lock().expect("lock").len(), MAX_TOOL_LOOP);
    }

    #[tokio::test]
    async fn capped_tool_loop_records_results_for_pending_calls() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        // Five tool-call rounds hit the cap on the first turn; the text
        // response is consumed by the follow-up turn.
        let backend = ScriptedBackend::new(vec![
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            tool_call("knowledge_search"),
            text("tudo certo"),
        ]);

        run_turn(&store, &id, &backend, None, None, Some(&EchoExecutor))
            .await
            .expect("turn completes");

        // The capped round's pending call got an error result, so the
        // session does not end on assistant-with-tool_calls.
        let session = store.get(&id).await.expect("session exists");
        let last = session.messages.last().expect("messages recorded");
        assert_eq!(last.role, "tool");
        assert_eq!(last.content, "error: tool loop limit reached");
        assert_eq!(last.tool_name.as_deref(), Some("knowledge_search"));

        // The next turn replays a history where every assistant message
        // carrying tool_calls is followed by a tool result.
        store
            .append_message(&id, SessionMessage::user("e agora?"))
            .await
            .expect("session exists");
        let result = run_turn(&store, &id, &backend, None, None, Some(&EchoExecutor))
            .await
            .expect("turn completes");
        assert_eq!(result.content, "tudo certo");

        let calls = backend.calls.lock().expect("lock");
        let history = calls.last().expect("calls recorded");
        for (i, m) in history.iter().enumerate() {
            if m.role == "assistant" && m.tool_calls.is_some() {
                assert_eq!(history[i + 1].role, "tool");
            }
        }
    }

    #[tokio::test]
    async fn tool_calls_without_executor_record_error_results() {
        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        let backend = ScriptedBackend::new(vec![tool_call("contact_lookup")]);

        run_turn(&store, &id, &backend, None, None, None)
            .await
            .expect("turn completes");
        let session = store.get(&id).await.expect("session exists");
        let last = session.messages.last().expect("messages recorded");
        assert_eq!(last.role, "tool");
        assert_eq!(last.content, "error: no tool executor available");
    }

    #[tokio::test]
    async fn failing_tool_becomes_an_error_string() {
        struct FailingExecutor;
        #[async_trait]
        impl ToolExecutor for FailingExecutor {
            async fn execute(
                &self,
                _name: &str,
                _args: &serde_json::Value,
            ) -> Result<String, String> {
                Err("boom".to_string())
            }
        }

        let store = SessionStore::new();
        let id = store.get_or_create("5511999990000", "Maria").await;
        store
            .append_message(&id, SessionMessage::user("oi"))
            .await
            .expect("session exists");
        let backend =
            ScriptedBackend::new(vec![tool_call("contact_lookup"), text("certo")]);

        run_turn(&store, &id, &backend, None, None, Some(&FailingExecutor))
            .await
            .expect("turn completes");
        let calls = backend.calls.lock().expect("lock");
        let tool_msg = calls[1].iter().find(|m| m.role == "tool").expect("tool msg");
        assert_eq!(tool_msg.content, "error: boom");
    }

    #[tokio::test]
    async fn router_replaces_empty_reply_with_fallback() {
        let backend = Arc::new(ScriptedBackend::new(vec![text("")]));
        let tools = Arc::new(ClinicTools {
            calendar: CalendarClient::new(None, "primary".to_string()),
            contacts: ContactStore::new(None, None),
            knowledge: KnowledgeBase::new(None, None, None),
            whatsapp: Arc::new(WhatsAppChannel::new(None, None)),
        });
        let router = AgentRouter::new(backend, tools, None);
        let reply = router
            .route(&InboundMessage {
                phone: "5511999990000".to_string(),
                text: "oi".to_string(),
                sender_name: "Maria".to_string(),
                message_id: None,
            })
            .await
            .expect("route completes");
        assert_eq!(reply, EMPTY_REPLY_FALLBACK);
    }
}
