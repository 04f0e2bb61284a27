//! Subscription broker
//!
//! Reference-counts live client interest per workspace and drives the
//! agent's watch lifecycle from the transitions: the first subscriber of a
//! workspace starts the agent watch, the last one leaving stops it. Inbound
//! change notifications are fanned out to every connection currently
//! subscribed to that workspace.
//!
//! The broker is the sole owner of the subscription map. The lock is only
//! held for synchronous map updates; agent HTTP calls happen outside it,
//! with the insert rolled back if the upstream watch could not be
//! established.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::agent_client::{AgentClient, AgentError};
use crate::server::protocol::ServerMessage;
use crate::agent::ChangeNotification;
use crate::workspace::WorkspaceStore;

/// Identifier of one live real-time connection.
pub type ConnId = Uuid;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Workspace '{0}' not found")]
    WorkspaceNotFound(String),
    #[error("Failed to start watch: {0}")]
    WatchFailed(#[from] AgentError),
}

#[derive(Default)]
struct BrokerState {
    /// workspace id → (connection id → event sender). The subscriber count
    /// of a workspace is the size of its map; the entry is removed when it
    /// reaches zero.
    subscribers: HashMap<String, HashMap<ConnId, mpsc::Sender<ServerMessage>>>,
    /// connection id → the single workspace it is subscribed to.
    connections: HashMap<ConnId, String>,
}

pub struct SubscriptionBroker {
    store: Arc<WorkspaceStore>,
    agent: AgentClient,
    public_base_url: String,
    state: Mutex<BrokerState>,
}

impl SubscriptionBroker {
    pub fn new(store: Arc<WorkspaceStore>, agent: AgentClient, public_base_url: String) -> Self {
        Self {
            store,
            agent,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            state: Mutex::new(BrokerState::default()),
        }
    }

    fn callback_url(&self, workspace_id: &str) -> String {
        format!(
            "{}/internal/workspaces/{}/notify-change",
            self.public_base_url, workspace_id
        )
    }

    /// Subscribe `conn` to `workspace_id`.
    ///
    /// A connection holds at most one subscription: a previous subscription
    /// to a different workspace is released first (with its own 1→0 agent
    /// stop if this was its last subscriber). On the 0→1 transition of the
    /// new workspace the agent watch is started; if that fails the insert
    /// is rolled back and the connection ends up unsubscribed.
    pub async fn watch(
        &self,
        conn: ConnId,
        tx: mpsc::Sender<ServerMessage>,
        workspace_id: &str,
    ) -> Result<(), BrokerError> {
        let workspace = self
            .store
            .get(workspace_id)
            .ok_or_else(|| BrokerError::WorkspaceNotFound(workspace_id.to_string()))?
            .clone();

        let (previous, first) = {
            let mut state = self.state.lock().await;

            if state.connections.get(&conn).map(String::as_str) == Some(workspace_id) {
                // Watching the same workspace again is a no-op.
                return Ok(());
            }

            let previous = remove_subscriber(&mut state, conn);

            let entry = state.subscribers.entry(workspace_id.to_string()).or_default();
            entry.insert(conn, tx);
            let first = entry.len() == 1;
            state.connections.insert(conn, workspace_id.to_string());
            (previous, first)
        };

        // Lock released: upstream calls must not block other subscriptions.
        if let Some(old_id) = previous {
            self.stop_agent_watch(&old_id).await;
        }

        if first {
            let patterns = self.store.effective_patterns(workspace_id);
            let callback = self.callback_url(workspace_id);
            if let Err(e) = self
                .agent
                .start_watch(&workspace.root_path, &callback, &patterns)
                .await
            {
                warn!(
                    "Could not establish watch for workspace '{}': {}",
                    workspace_id, e
                );
                // Roll back: the subscription must not stick without a watch.
                let mut state = self.state.lock().await;
                if state.connections.get(&conn).map(String::as_str) == Some(workspace_id) {
                    remove_subscriber(&mut state, conn);
                }
                return Err(BrokerError::WatchFailed(e));
            }
            info!(
                "Watch established for workspace '{}' at {:?}",
                workspace_id, workspace.root_path
            );
        }

        Ok(())
    }

    /// Release the subscription of `conn`, if any. Returns the workspace id
    /// it was subscribed to. Called on explicit stop-watch and on
    /// disconnect.
    pub async fn unwatch(&self, conn: ConnId) -> Option<String> {
        let released = {
            let mut state = self.state.lock().await;
            remove_subscriber(&mut state, conn)
        };

        if let Some(workspace_id) = &released {
            self.stop_agent_watch(workspace_id).await;
        }
        released
    }

    /// Stop the agent watch for a workspace whose subscriber set just
    /// became empty. Failures are logged only: the local state is already
    /// clean and the agent's stop is idempotent, so a later 0→1 transition
    /// simply starts over.
    async fn stop_agent_watch(&self, workspace_id: &str) {
        let still_subscribed = {
            let state = self.state.lock().await;
            state.subscribers.contains_key(workspace_id)
        };
        if still_subscribed {
            return;
        }

        let Some(workspace) = self.store.get(workspace_id) else {
            return;
        };
        info!("Last subscriber left workspace '{}', stopping watch", workspace_id);
        if let Err(e) = self.agent.stop_watch(&workspace.root_path).await {
            warn!(
                "Failed to stop agent watch for workspace '{}': {}",
                workspace_id, e
            );
        }
    }

    /// Fan an inbound change notification out to every connection
    /// currently subscribed to `workspace_id`. Returns the number of
    /// connections the event was delivered to.
    pub async fn notify(&self, workspace_id: &str, change: ChangeNotification) -> usize {
        let targets: Vec<mpsc::Sender<ServerMessage>> = {
            let state = self.state.lock().await;
            match state.subscribers.get(workspace_id) {
                Some(conns) => conns.values().cloned().collect(),
                None => Vec::new(),
            }
        };

        if targets.is_empty() {
            debug!(
                "Dropping notification for workspace '{}' with no subscribers",
                workspace_id
            );
            return 0;
        }

        let msg = ServerMessage::FilesystemChange {
            workspace_id: workspace_id.to_string(),
            change,
        };

        let mut delivered = 0;
        for tx in targets {
            // A full or closed channel means the connection is on its way
            // out; the event is dropped for that connection only.
            if tx.send(msg.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        debug!(
            "Fanned out change in workspace '{}' to {} connection(s)",
            workspace_id, delivered
        );
        delivered
    }

    /// Number of connections currently subscribed to a workspace.
    pub async fn subscriber_count(&self, workspace_id: &str) -> usize {
        let state = self.state.lock().await;
        state
            .subscribers
            .get(workspace_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// The workspace a connection is subscribed to, if any.
    pub async fn subscription_of(&self, conn: ConnId) -> Option<String> {
        let state = self.state.lock().await;
        state.connections.get(&conn).cloned()
    }
}

/// Remove `conn` from whatever workspace it is subscribed to; returns that
/// workspace id. Deletes the workspace entry when its set becomes empty.
fn remove_subscriber(state: &mut BrokerState, conn: ConnId) -> Option<String> {
    let workspace_id = state.connections.remove(&conn)?;
    if let Some(conns) = state.subscribers.get_mut(&workspace_id) {
        conns.remove(&conn);
        if conns.is_empty() {
            state.subscribers.remove(&workspace_id);
        }
    }
    Some(workspace_id)
}
