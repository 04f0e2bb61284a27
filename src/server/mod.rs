//! Main server
//!
//! Hosts the real-time WebSocket endpoint for UI clients and the internal
//! callback endpoint the agent POSTs change notifications to. Everything
//! else (workspace CRUD, prompt rendering) lives in the management layer
//! and is out of scope here.

pub mod agent_client;
pub mod broker;
pub mod protocol;
pub mod ws;

pub use agent_client::{AgentClient, AgentError};
pub use broker::{BrokerError, ConnId, SubscriptionBroker};
pub use protocol::{ClientMessage, ServerMessage};

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::ChangeNotification;
use crate::config::ServerConfig;
use crate::workspace::{WorkspaceConfig, WorkspaceStore};

/// Shared per-request context: one broker, one agent client, one workspace
/// store per process, constructed at startup and injected via state.
#[derive(Clone)]
pub struct ServerContext {
    pub broker: Arc<SubscriptionBroker>,
    pub agent: AgentClient,
    pub store: Arc<WorkspaceStore>,
}

/// Build the main server router; exposed separately so tests can serve it
/// on an ephemeral port.
pub fn router(ctx: ServerContext) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/internal/workspaces/:id/notify-change",
            post(notify_change),
        )
        .with_state(ctx)
}

/// Wire the context up from configuration.
pub fn build_context(config: &ServerConfig) -> ServerContext {
    let workspaces: std::collections::HashMap<String, WorkspaceConfig> =
        config.workspaces.clone();
    let store = Arc::new(WorkspaceStore::new(
        config.ignore_patterns.clone(),
        workspaces,
    ));
    let agent = AgentClient::new(
        &config.agent_base_url,
        Duration::from_millis(config.agent_timeout_ms),
    );
    let broker = Arc::new(SubscriptionBroker::new(
        store.clone(),
        agent.clone(),
        config.public_base_url(),
    ));
    ServerContext {
        broker,
        agent,
        store,
    }
}

/// Run the main server until the process exits.
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = build_context(&config);
    info!(
        "Loaded {} workspace(s), agent at {}",
        ctx.store.len(),
        config.agent_base_url
    );

    let app = router(ctx);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{} (ws://{}/ws)", addr, addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// POST /internal/workspaces/:id/notify-change
///
/// Inbound change notification from the agent; fans out to subscribers of
/// the workspace and answers 204. Unknown workspaces are not an error —
/// the subscriber set is simply empty (the watch may have been stopped
/// while a notification was in flight).
async fn notify_change(
    AxumPath(workspace_id): AxumPath<String>,
    State(ctx): State<ServerContext>,
    Json(change): Json<serde_json::Value>,
) -> Response {
    let change: ChangeNotification = match serde_json::from_value(change) {
        Ok(n) => n,
        Err(e) => {
            warn!("Malformed change notification for '{}': {}", workspace_id, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid notification body: {}", e) })),
            )
                .into_response();
        }
    };

    ctx.broker.notify(&workspace_id, change).await;
    StatusCode::NO_CONTENT.into_response()
}
