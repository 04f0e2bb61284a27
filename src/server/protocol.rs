//! Real-time client protocol
//!
//! JSON text frames over the WebSocket, tagged with `type`. Event names are
//! the logical protocol names (`watch-workspace`, `filesystem:change`, ...);
//! payload fields are camelCase.

use serde::{Deserialize, Serialize};

use crate::agent::{ChangeNotification, FileContent, FileNode};

/// Messages a UI client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Subscribe to live filesystem changes of a workspace. A connection
    /// holds at most one subscription; watching another workspace
    /// implicitly unsubscribes from the previous one.
    #[serde(rename = "watch-workspace", rename_all = "camelCase")]
    WatchWorkspace { workspace_id: String },

    /// Drop the current subscription, if any.
    #[serde(rename = "stop-watch")]
    StopWatch,

    /// On-demand structure snapshot of a workspace, proxied to the agent.
    #[serde(rename = "get-structure", rename_all = "camelCase")]
    GetStructure { workspace_id: String },

    /// On-demand batch file contents, proxied to the agent.
    #[serde(rename = "get-file-contents", rename_all = "camelCase")]
    GetFileContents {
        workspace_id: String,
        files: Vec<String>,
    },

    #[serde(rename = "ping")]
    Ping,
}

/// Messages the server sends to a UI client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "watch-started", rename_all = "camelCase")]
    WatchStarted { workspace_id: String },

    #[serde(rename = "watch-stopped")]
    WatchStopped,

    /// A filesystem change in a watched workspace, fanned out to every
    /// connection currently subscribed to it. No buffering: connections
    /// that join later never see earlier events.
    #[serde(rename = "filesystem:change", rename_all = "camelCase")]
    FilesystemChange {
        workspace_id: String,
        change: ChangeNotification,
    },

    #[serde(rename = "structure", rename_all = "camelCase")]
    Structure {
        workspace_id: String,
        nodes: Vec<FileNode>,
    },

    #[serde(rename = "file-contents", rename_all = "camelCase")]
    FileContents {
        workspace_id: String,
        files: Vec<FileContent>,
    },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ChangeKind;

    #[test]
    fn test_client_message_wire_names() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"watch-workspace","workspaceId":"ws1"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::WatchWorkspace { workspace_id } if workspace_id == "ws1"
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop-watch"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::StopWatch));
    }

    #[test]
    fn test_filesystem_change_frame() {
        let msg = ServerMessage::FilesystemChange {
            workspace_id: "ws1".to_string(),
            change: ChangeNotification {
                kind: ChangeKind::Add,
                path: "x.txt".to_string(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "filesystem:change");
        assert_eq!(json["workspaceId"], "ws1");
        assert_eq!(json["change"]["type"], "add");
        assert_eq!(json["change"]["path"], "x.txt");
    }
}
