//! Directory structure walker
//!
//! Builds the structure tree served by `GET /structure`. Exclusion is
//! subtree-wide: an entry matching the ignore patterns is dropped together
//! with everything below it. A subdirectory that cannot be listed is dropped
//! from the result instead of failing the walk — one unreadable subtree must
//! not prevent returning the rest of the tree.

use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::agent::patterns;
use crate::agent::protocol::{FileNode, NodeKind};

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Failed to read directory {path}: {source}")]
    ReadFailure {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Walk `root` recursively, applying `ignore_patterns`, and return the
/// ordered tree: directories before files at every level, each group
/// ascending by name.
pub fn walk(root: &Path, ignore_patterns: &[String]) -> Result<Vec<FileNode>, WalkError> {
    if !root.is_dir() {
        return Err(WalkError::NotADirectory(root.display().to_string()));
    }

    walk_dir(root, root, ignore_patterns).map_err(|e| WalkError::ReadFailure {
        path: root.display().to_string(),
        source: e,
    })
}

fn walk_dir(root: &Path, dir: &Path, ignore_patterns: &[String]) -> io::Result<Vec<FileNode>> {
    let mut dirs: Vec<FileNode> = Vec::new();
    let mut files: Vec<FileNode> = Vec::new();

    for entry in fs::read_dir(dir)? {
        // A single unstat-able entry should not take down its siblings.
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let path = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(raw) => {
                warn!("Skipping non-UTF-8 entry name {:?} in {:?}", raw, dir);
                continue;
            }
        };

        // Relative to the walk root, not the immediate parent.
        let rel_path = match relative_slash_path(root, &path) {
            Some(p) => p,
            None => continue,
        };

        if patterns::matches(&rel_path, ignore_patterns) {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!("Skipping entry {:?}: {}", path, e);
                continue;
            }
        };

        if file_type.is_dir() {
            match walk_dir(root, &path, ignore_patterns) {
                Ok(children) => dirs.push(FileNode {
                    name,
                    path: rel_path,
                    kind: NodeKind::Directory,
                    children: Some(children),
                }),
                Err(e) => {
                    // Failure isolation: drop this subtree, keep the rest.
                    warn!("Dropping unreadable directory {:?}: {}", path, e);
                }
            }
        } else if file_type.is_file() {
            files.push(FileNode {
                name,
                path: rel_path,
                kind: NodeKind::File,
                children: None,
            });
        }
        // Symlinks and special files are not part of the structure tree.
    }

    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    dirs.extend(files);
    Ok(dirs)
}

/// Relative `/`-separated path of `path` under `root`, no leading slash.
fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
