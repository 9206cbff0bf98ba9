//! Gateway HTTP server: health endpoint and the UAZAPI webhook.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router as AxumRouter,
};
use serde_json::{json, Value};

use crate::agent::AgentRouter;
use crate::agent_ctx;
use crate::calendar::{CalendarClient, CalendarCredentials};
use crate::channels::{Router, WhatsAppChannel};
use crate::config::{self, Config};
use crate::contacts::ContactStore;
use crate::init;
use crate::knowledge::KnowledgeBase;
use crate::llm::OpenAiClient;
use crate::tools::ClinicTools;
use crate::webhook::{self, prefix, WebhookOutcome};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    router: Arc<dyn Router>,
    whatsapp: Arc<WhatsAppChannel>,
    port: u16,
}

impl GatewayState {
    pub fn new(router: Arc<dyn Router>, whatsapp: Arc<WhatsAppChannel>, port: u16) -> Self {
        Self {
            router,
            whatsapp,
            port,
        }
    }
}

/// Build the axum application. Split out from [`run_gateway`] so tests can
/// serve it with a scripted router.
pub fn app(state: GatewayState) -> AxumRouter {
    AxumRouter::new()
        .route("/", get(health))
        .route("/webhook/uazapi", post(uazapi_webhook))
        .with_state(state)
}

/// Start the gateway with the production wiring. Blocks until shutdown
/// (SIGINT or SIGTERM).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path)?;

    let whatsapp = Arc::new(WhatsAppChannel::new(
        config::resolve_uazapi_base_url(&config),
        config::resolve_uazapi_token(&config),
    ));
    let calendar = CalendarClient::new(
        config::resolve_calendar_credentials(&config).map(
            |(client_id, client_secret, refresh_token)| CalendarCredentials {
                client_id,
                client_secret,
                refresh_token,
            },
        ),
        config::resolve_calendar_id(&config),
    );
    let (supabase_url, supabase_key) = match config::resolve_supabase(&config) {
        Some((url, key)) => (Some(url), Some(key)),
        None => {
            log::warn!("supabase not configured; contact and knowledge tools will report errors");
            (None, None)
        }
    };
    let openai_key = config::resolve_openai_key(&config);
    if openai_key.is_none() {
        log::warn!("OPENAI_API_KEY not configured; agent turns will fail");
    }

    let tools = Arc::new(ClinicTools {
        calendar,
        contacts: ContactStore::new(supabase_url.clone(), supabase_key.clone()),
        knowledge: KnowledgeBase::new(supabase_url, supabase_key, openai_key.clone()),
        whatsapp: Arc::clone(&whatsapp),
    });

    let backend = Arc::new(OpenAiClient::new(
        openai_key,
        config.agents.default_model.clone(),
    ));
    log::info!("agent model: {}", backend.model());

    let system_prompt = agent_ctx::load_system_prompt(config_path.parent());
    if system_prompt.is_none() {
        log::warn!("PROMPT.md not found in config directory; running without a system prompt");
    }

    let router: Arc<dyn Router> = Arc::new(AgentRouter::new(backend, tools, system_prompt));
    let state = GatewayState::new(router, whatsapp, config.gateway.port);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET / returns a simple health JSON (for probes).
async fn health(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
    }))
}

/// POST /webhook/uazapi — normalize the provider payload, run the agent,
/// answer with the turn summary. Always returns JSON; a failed turn is an
/// HTTP 500 body, never a hung or dropped connection.
async fn uazapi_webhook(State(state): State<GatewayState>, Json(payload): Json<Value>) -> Response {
    let message = match webhook::normalize(&payload) {
        WebhookOutcome::Ignored { reason } => {
            log::debug!("webhook ignored: {}", reason);
            return Json(json!({ "ok": true, "ignored": true, "reason": reason }))
                .into_response();
        }
        WebhookOutcome::Message(m) => m,
    };

    log::info!(
        "whatsapp message from {} ({}...)",
        message.sender_name,
        prefix(&message.phone, 6)
    );

    // Advisory read receipt; never joined into the response.
    if let Some(ref id) = message.message_id {
        Arc::clone(&state.whatsapp).spawn_mark_read(id.clone());
    }

    match state.router.route(&message).await {
        Ok(response) => Json(json!({
            "ok": true,
            "context_id": message.phone,
            "sender_name": message.sender_name,
            "message_received": prefix(&message.text, 50),
            "response": response,
        }))
        .into_response(),
        Err(e) => {
            log::error!(
                "error processing message from {}...: {:#}",
                prefix(&message.phone, 6),
                e
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
