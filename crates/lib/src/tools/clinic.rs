//! Clinic tools: map agent intent to the calendar, contact, knowledge and
//! WhatsApp collaborators.
//!
//! Every collaborator error is flattened into a message string for the
//! model. Each tool makes at most one attempt per collaborator call; there
//! are no retries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::agent::ToolExecutor;
use crate::calendar::{CalendarClient, CalendarError};
use crate::channels::{MenuKind, WhatsAppChannel, WhatsAppError};
use crate::contacts::{ContactError, ContactQuery, ContactStore};
use crate::knowledge::{KnowledgeBase, KnowledgeError};
use crate::llm::{ToolDefinition, ToolFunctionDefinition};
use crate::slots;

const DEFAULT_DAYS_AHEAD: u32 = 14;
const DEFAULT_PROCEDURE: &str = "avaliação";

/// The clinic's collaborator clients, shared across conversations.
pub struct ClinicTools {
    pub calendar: CalendarClient,
    pub contacts: ContactStore,
    pub knowledge: KnowledgeBase,
    pub whatsapp: Arc<WhatsAppChannel>,
}

/// Executor bound to one conversation's phone number.
pub struct ClinicToolExecutor {
    tools: Arc<ClinicTools>,
    phone: String,
}

impl ClinicToolExecutor {
    pub fn new(tools: Arc<ClinicTools>, phone: String) -> Self {
        Self { tools, phone }
    }

    async fn calendar_search(&self, args: &Value) -> String {
        let start_date = args.get("start_date").and_then(Value::as_str);
        let days = args
            .get("days")
            .and_then(Value::as_u64)
            .map(|d| d as u32)
            .unwrap_or(DEFAULT_DAYS_AHEAD);
        let procedure = args
            .get("procedure_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PROCEDURE);

        let now = Utc::now();
        let reference = slots::resolve_reference_date(start_date, now);
        let window_end = reference + Duration::days(days as i64);

        let busy = match self.tools.calendar.busy_intervals(reference, window_end).await {
            Ok(busy) => busy,
            Err(CalendarError::NotConfigured) => {
                return "Erro: Calendário não configurado.".to_string();
            }
            Err(e) => {
                log::error!("calendar search failed: {}", e);
                return format!("Erro ao buscar horários: {}", e);
            }
        };

        let free = slots::find_free_slots(&busy, reference, days, now);
        slots::format_slots(&free, procedure, days)
    }

    async fn contact_lookup(&self, args: &Value) -> String {
        let cpf = args.get("cpf").and_then(Value::as_str);
        let phone = args.get("phone").and_then(Value::as_str);
        let query = match ContactQuery::parse(cpf, phone) {
            Ok(q) => q,
            Err(ContactError::InvalidCpf) => {
                return "CPF inválido: deve ter 11 dígitos.".to_string();
            }
            Err(_) => {
                return "Erro: Forneça CPF ou telefone para buscar o paciente.".to_string();
            }
        };
        match self.tools.contacts.find(&query).await {
            Ok(Some(contact)) => contact.card(),
            Ok(None) => format!(
                "Paciente não encontrado com '{}'. Pode ser um novo paciente.",
                query.term()
            ),
            Err(ContactError::NotConfigured) => "Erro: Supabase não configurado.".to_string(),
            Err(ContactError::Api(_)) => {
                "Erro ao buscar contato no banco de dados.".to_string()
            }
            Err(e) => {
                log::error!("contact lookup failed: {}", e);
                format!("Erro ao buscar contato: {}", e)
            }
        }
    }

    async fn knowledge_search(&self, args: &Value) -> String {
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        match self.tools.knowledge.search(query).await {
            Ok(answer) => answer,
            Err(KnowledgeError::EmptyQuery) => {
                "Erro: Consulta vazia. Especifique o que deseja buscar.".to_string()
            }
            Err(KnowledgeError::NotConfigured) => "Erro: Supabase não configurado.".to_string(),
            Err(e) => {
                log::error!("knowledge search failed: {}", e);
                format!("Erro ao buscar informações: {}", e)
            }
        }
    }

    async fn whatsapp_send(&self, args: &Value) -> String {
        let message = args.get("message").and_then(Value::as_str).unwrap_or("");
        if message.is_empty() {
            return "Erro: Mensagem vazia.".to_string();
        }
        let msg_type = args.get("type").and_then(Value::as_str).unwrap_or("text");

        let result = if msg_type == "menu" {
            let menu = args.get("menu").cloned().unwrap_or(Value::Null);
            let kind = match menu.get("menu_type").and_then(Value::as_str) {
                Some("buttons") => MenuKind::Buttons,
                _ => MenuKind::List,
            };
            let button_text = menu
                .get("button_text")
                .and_then(Value::as_str)
                .unwrap_or("Ver opções")
                .to_string();
            let choices: Vec<String> = menu
                .get("choices")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            self.tools
                .whatsapp
                .send_menu(&self.phone, kind, message, &button_text, &choices)
                .await
        } else {
            self.tools.whatsapp.send_text(&self.phone, message).await
        };

        match result {
            Ok(()) => "Mensagem enviada para o paciente.".to_string(),
            Err(WhatsAppError::NotConfigured) => {
                "Erro: UAZAPI não configurado (UAZAPI_BASE_URL ou UAZAPI_INSTANCE_TOKEN ausente)."
                    .to_string()
            }
            Err(WhatsAppError::Api { status, .. }) => {
                log::error!("whatsapp send failed with {}", status);
                format!("Erro ao enviar mensagem: HTTP {}", status.as_u16())
            }
            Err(e) => {
                log::error!("whatsapp send failed: {}", e);
                format!("Erro ao enviar mensagem: {}", e)
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for ClinicToolExecutor {
    async fn execute(&self, name: &str, args: &Value) -> Result<String, String> {
        let args = normalize_args(args);
        let out = match name {
            "calendar_search" => self.calendar_search(&args).await,
            "contact_lookup" => self.contact_lookup(&args).await,
            "knowledge_search" => self.knowledge_search(&args).await,
            "whatsapp_send" => self.whatsapp_send(&args).await,
            other => return Err(format!("unknown tool: {}", other)),
        };
        Ok(out)
    }
}

/// Models sometimes return arguments as a JSON string instead of an object.
fn normalize_args(args: &Value) -> Value {
    match args {
        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Tool definitions handed to the model for function-calling.
pub fn clinic_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: "calendar_search".to_string(),
                description: Some(
                    "Busca horários disponíveis na agenda da clínica para agendamento."
                        .to_string(),
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "start_date": { "type": "string", "description": "Data inicial YYYY-MM-DD, ou 'today'" },
                        "days": { "type": "integer", "description": "Janela de busca em dias (padrão 14)" },
                        "procedure_type": { "type": "string", "description": "Procedimento desejado (ex.: botox, avaliação)" }
                    }
                }),
            },
        },
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: "contact_lookup".to_string(),
                description: Some(
                    "Busca o cadastro de um paciente por CPF ou telefone.".to_string(),
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "cpf": { "type": "string", "description": "CPF do paciente (11 dígitos, com ou sem pontuação)" },
                        "phone": { "type": "string", "description": "Telefone do paciente" }
                    }
                }),
            },
        },
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: "knowledge_search".to_string(),
                description: Some(
                    "Consulta a base de conhecimento da clínica: procedimentos, preços e políticas."
                        .to_string(),
                ),
                parameters: json!({
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": { "type": "string", "description": "O que buscar" }
                    }
                }),
            },
        },
        ToolDefinition {
            typ: "function".to_string(),
            function: ToolFunctionDefinition {
                name: "whatsapp_send".to_string(),
                description: Some(
                    "Envia uma mensagem WhatsApp extra ao paciente (texto ou menu interativo)."
                        .to_string(),
                ),
                parameters: json!({
                    "type": "object",
                    "required": ["message"],
                    "properties": {
                        "message": { "type": "string", "description": "Texto da mensagem" },
                        "type": { "type": "string", "enum": ["text", "menu"], "description": "Tipo de mensagem" },
                        "menu": {
                            "type": "object",
                            "properties": {
                                "menu_type": { "type": "string", "enum": ["list", "buttons"] },
                                "button_text": { "type": "string" },
                                "choices": { "type": "array", "items": { "type": "string" } }
                            }
                        }
                    }
                }),
            },
        },
    ]
}
