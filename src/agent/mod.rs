//! Filesystem agent
//!
//! A small local HTTP service the main server talks to: directory structure
//! snapshots, best-effort batch file reads, and recursive filesystem watches
//! that push change notifications to a callback URL.

pub mod handlers;
pub mod patterns;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod walker;

pub use protocol::{ChangeKind, ChangeNotification, FileContent, FileNode, NodeKind};
pub use registry::{RegistryError, WatchRegistry};
pub use walker::WalkError;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::config::AgentConfig;

/// Shared agent state: the watch registry is the sole owner of OS watch
/// handles, constructed once here and injected into the handlers.
#[derive(Clone)]
pub struct AgentState {
    pub registry: Arc<WatchRegistry>,
}

/// Build the agent router; exposed separately so tests can serve it on an
/// ephemeral port.
pub fn router(state: AgentState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/structure", get(handlers::structure))
        .route("/files/content", post(handlers::files_content))
        .route("/watch", post(handlers::watch))
        .route("/unwatch", post(handlers::unwatch))
        .layer(build_cors(cors_origins))
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Run the agent HTTP service until the process exits.
pub async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(WatchRegistry::new(
        Duration::from_millis(config.debounce_ms),
        config.max_watch_depth,
        Duration::from_millis(config.callback_timeout_ms),
    ));
    let state = AgentState { registry };

    let app = router(state, &config.cors_origins);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Agent listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
