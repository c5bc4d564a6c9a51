//! HTTP server: status page, pairing, webhook ingress.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::client::evolution::{parse_webhook, EvolutionConnector, WebhookRouter};
use crate::commands::Dispatcher;
use crate::config::{self, Config};
use crate::jid;
use crate::session::{SessionRegistry, SessionStore};

/// Reply to `/pair` without a usable number.
pub const PAIR_USAGE: &str = "Use /pair?number=2547XXXXXXXX";

/// Shared state for every route.
#[derive(Clone)]
pub struct GatewayState {
    pub bot_name: Arc<str>,
    pub port: u16,
    pub registry: Arc<SessionRegistry>,
    pub webhooks: Arc<WebhookRouter>,
    pub started: Instant,
}

impl GatewayState {
    /// Wire the store, bridge connector, dispatcher and registry from config.
    pub fn from_config(config: &Config) -> Self {
        let webhooks = Arc::new(WebhookRouter::new());
        let connector = Arc::new(EvolutionConnector::new(
            config.bridge.api_url.clone(),
            config::bridge_api_key(config),
            config::public_url(config),
            webhooks.clone(),
        ));
        let store = Arc::new(SessionStore::new(config.bot.sessions_dir.clone()));
        let dispatcher = Arc::new(Dispatcher::from_config(&config.bot));
        let registry = Arc::new(SessionRegistry::new(
            store,
            connector,
            dispatcher,
            config.bot.browser.clone(),
        ));
        Self {
            bot_name: Arc::from(config.bot.name.as_str()),
            port: config.gateway.port,
            registry,
            webhooks,
            started: Instant::now(),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/health", get(health_http))
        .route("/pair", get(pair_http))
        .route("/webhook/:number", post(webhook_http))
        .with_state(state)
}

/// Run the gateway until Ctrl+C or SIGTERM. Stored sessions are resumed in the background once
/// the listener is bound, so their webhooks have somewhere to land.
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    log::info!(
        "bridge {} (webhooks via {})",
        config.bridge.api_url,
        config::public_url(&config)
    );

    let state = GatewayState::from_config(&config);
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let resumed = registry.resume_all().await;
        if resumed > 0 {
            log::info!("resumed {} stored session(s)", resumed);
        }
    });

    serve(listener, state).await
}

/// Serve on an already-bound listener until shutdown.
pub async fn serve(listener: tokio::net::TcpListener, state: GatewayState) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server")?;
    log::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

async fn status_page(State(state): State<GatewayState>) -> Html<String> {
    Html(format!(
        "{} Multi Web Pairing Running ✅<br>{}",
        state.bot_name, PAIR_USAGE
    ))
}

async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "sessions": state.registry.numbers().await,
        "uptimeSecs": state.started.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct PairQuery {
    number: Option<String>,
}

async fn pair_http(State(state): State<GatewayState>, Query(query): Query<PairQuery>) -> Html<String> {
    let number = jid::sanitize_number(query.number.as_deref().unwrap_or_default());
    if number.is_empty() {
        return Html(PAIR_USAGE.to_string());
    }
    match state.registry.pair(&number).await {
        Ok(outcome) => Html(format!(
            "<h2>{} Pairing Code:</h2><h1>{}</h1>",
            state.bot_name, outcome
        )),
        Err(e) => {
            log::warn!("pairing {} failed: {}", number, e);
            Html(format!("Error: {}", e))
        }
    }
}

/// Bridge event ingress. 404 when no live session owns the number so the bridge can tell a
/// stale webhook from a delivered one.
async fn webhook_http(
    State(state): State<GatewayState>,
    Path(number): Path<String>,
    body: Bytes,
) -> StatusCode {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("webhook {}: invalid body: {}", number, e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let events = parse_webhook(&payload);
    if state.webhooks.deliver(&number, events).await {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
