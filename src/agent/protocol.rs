//! Wire types for the agent HTTP API.
//!
//! Field names follow the JSON contract consumed by the main server
//! (camelCase: `basePath`, `callbackUrl`, `ignorePatterns`).

use serde::{Deserialize, Serialize};

/// Node kind in a structure tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

/// One entry of a directory structure tree.
///
/// `path` is relative to the walk root, `/`-separated on every OS, with no
/// leading or trailing slash. Directories carry `children`; files never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

/// One successfully read file from a batch content request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Filesystem change kinds relayed to the callback URL.
///
/// Only add/remove at path granularity; content modifications are not
/// part of the notification contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Add,
    Unlink,
    AddDir,
    UnlinkDir,
}

/// Body of a change-notification POST to the callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_node_wire_format() {
        let node = FileNode {
            name: "src".to_string(),
            path: "src".to_string(),
            kind: NodeKind::Directory,
            children: Some(vec![FileNode {
                name: "main.rs".to_string(),
                path: "src/main.rs".to_string(),
                kind: NodeKind::File,
                children: None,
            }]),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "directory");
        assert_eq!(json["children"][0]["type"], "file");
        // Files must not serialize a children field at all.
        assert!(json["children"][0].get("children").is_none());
    }

    #[test]
    fn test_change_kind_names() {
        let note = ChangeNotification {
            kind: ChangeKind::AddDir,
            path: "sub/dir".to_string(),
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "addDir");
        assert_eq!(json["path"], "sub/dir");

        let back: ChangeNotification =
            serde_json::from_str(r#"{"type":"unlink","path":"a.txt"}"#).unwrap();
        assert_eq!(back.kind, ChangeKind::Unlink);
    }
}
