//! WebSocket connection handling
//!
//! One loop per connection: client frames and broker fan-out events are
//! multiplexed with tokio::select. Disconnect is an implicit stop-watch for
//! whatever the connection was subscribed to.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::server::broker::ConnId;
use crate::server::protocol::{ClientMessage, ServerMessage};
use crate::server::ServerContext;

/// Per-connection event channel capacity. Fan-out sends block briefly when
/// a client is this far behind; the broker drops events for closed peers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ServerContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Handle a WebSocket connection until it closes.
async fn handle_socket(mut socket: WebSocket, ctx: ServerContext) {
    let conn: ConnId = Uuid::new_v4();
    info!("WebSocket connection established: conn={}", conn);

    // Fan-out events for this connection arrive on this channel; the
    // broker holds the sender while the connection is subscribed.
    let (event_tx, mut event_rx) =
        mpsc::channel::<ServerMessage>(EVENT_CHANNEL_CAPACITY);

    loop {
        tokio::select! {
            biased;  // client frames take priority over fan-out events

            msg_result = socket.recv() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(
                            &text,
                            &mut socket,
                            &ctx,
                            conn,
                            &event_tx,
                        ).await {
                            warn!("Error handling client message: {}", e);
                            let reply = ServerMessage::Error { message: e };
                            if send_message(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Connection {} closed by client", conn);
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Binary frame from {}, text JSON expected", conn);
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Handled automatically by axum
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => {
                        debug!("Connection {} recv returned None", conn);
                        break;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                if let Err(e) = send_message(&mut socket, &event).await {
                    error!("Failed to forward event to {}: {}", conn, e);
                    break;
                }
            }
        }
    }

    // Disconnect is an implicit stop-watch.
    if let Some(workspace_id) = ctx.broker.unwatch(conn).await {
        info!(
            "Connection {} disconnected, released subscription to '{}'",
            conn, workspace_id
        );
    }
    debug!("Connection handler for {} finished", conn);
}

async fn handle_client_message(
    text: &str,
    socket: &mut WebSocket,
    ctx: &ServerContext,
    conn: ConnId,
    event_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), String> {
    let client_msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| format!("Parse error: {}", e))?;

    match client_msg {
        ClientMessage::WatchWorkspace { workspace_id } => {
            info!("conn={} watch-workspace {}", conn, workspace_id);
            match ctx.broker.watch(conn, event_tx.clone(), &workspace_id).await {
                Ok(()) => {
                    send_message(socket, &ServerMessage::WatchStarted { workspace_id })
                        .await?;
                }
                Err(e) => {
                    send_message(
                        socket,
                        &ServerMessage::Error {
                            message: e.to_string(),
                        },
                    )
                    .await?;
                }
            }
        }

        ClientMessage::StopWatch => {
            info!("conn={} stop-watch", conn);
            ctx.broker.unwatch(conn).await;
            send_message(socket, &ServerMessage::WatchStopped).await?;
        }

        ClientMessage::GetStructure { workspace_id } => {
            let Some(workspace) = ctx.store.get(&workspace_id) else {
                return Err(format!("Workspace '{}' not found", workspace_id));
            };
            let patterns = ctx.store.effective_patterns(&workspace_id);
            match ctx.agent.structure(&workspace.root_path, &patterns).await {
                Ok(nodes) => {
                    send_message(
                        socket,
                        &ServerMessage::Structure {
                            workspace_id,
                            nodes,
                        },
                    )
                    .await?;
                }
                Err(e) => return Err(e.to_string()),
            }
        }

        ClientMessage::GetFileContents {
            workspace_id,
            files,
        } => {
            let Some(workspace) = ctx.store.get(&workspace_id) else {
                return Err(format!("Workspace '{}' not found", workspace_id));
            };
            match ctx.agent.file_contents(&workspace.root_path, &files).await {
                Ok(files) => {
                    send_message(
                        socket,
                        &ServerMessage::FileContents {
                            workspace_id,
                            files,
                        },
                    )
                    .await?;
                }
                Err(e) => return Err(e.to_string()),
            }
        }

        ClientMessage::Ping => {
            send_message(socket, &ServerMessage::Pong).await?;
        }
    }

    Ok(())
}

/// Send a server message as a JSON text frame.
pub async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), String> {
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}
