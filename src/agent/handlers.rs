//! Agent HTTP handlers
//!
//! Thin request/response mapping over the walker, reader and registry.
//! Request bodies are validated by hand so missing or mistyped fields
//! always produce a 400 with a readable message, per the API contract.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use url::Url;

use crate::agent::AgentState;
use crate::agent::{reader, walker};

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

/// GET /status
pub async fn status() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

#[derive(Debug, Deserialize)]
pub struct StructureQuery {
    path: Option<String>,
    #[serde(rename = "ignorePatterns")]
    ignore_patterns: Option<String>,
}

/// GET /structure?path=&ignorePatterns=
pub async fn structure(Query(query): Query<StructureQuery>) -> Response {
    let path = match query.path {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return bad_request("Missing required query parameter: path"),
    };
    let ignore_patterns: Vec<String> = query
        .ignore_patterns
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    // Pre-check so an absent or non-directory path is a clean 404 rather
    // than a walk failure.
    if !path.is_dir() {
        return not_found(format!("Path not accessible: {}", path.display()));
    }

    let result =
        tokio::task::spawn_blocking(move || walker::walk(&path, &ignore_patterns)).await;

    match result {
        Ok(Ok(nodes)) => Json(nodes).into_response(),
        Ok(Err(e)) => {
            error!("Structure walk failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Structure walk task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "walk task failed" })),
            )
                .into_response()
        }
    }
}

/// POST /files/content  body: {basePath, files}
pub async fn files_content(Json(body): Json<Value>) -> Response {
    let base_path = match body.get("basePath").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return bad_request("Missing or invalid field: basePath"),
    };
    let files: Vec<String> = match body.get("files").and_then(Value::as_array) {
        Some(list) => {
            let mut files = Vec::with_capacity(list.len());
            for item in list {
                match item.as_str() {
                    Some(s) => files.push(s.to_string()),
                    None => return bad_request("Field 'files' must be an array of strings"),
                }
            }
            files
        }
        None => return bad_request("Missing or invalid field: files"),
    };

    if !base_path.exists() {
        return not_found(format!(
            "Base path not accessible: {}",
            base_path.display()
        ));
    }

    let result =
        tokio::task::spawn_blocking(move || reader::read_many(&base_path, &files)).await;

    match result {
        Ok(contents) => Json(contents).into_response(),
        Err(e) => {
            error!("File read task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "read task failed" })),
            )
                .into_response()
        }
    }
}

/// POST /watch  body: {path, callbackUrl, ignorePatterns?}
///
/// Responds 202 Accepted: the watch is established asynchronously and the
/// caller does not wait for it.
pub async fn watch(State(state): State<AgentState>, Json(body): Json<Value>) -> Response {
    let path = match body.get("path").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return bad_request("Missing or invalid field: path"),
    };
    let callback_url = match body.get("callbackUrl").and_then(Value::as_str) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => return bad_request("Missing or invalid field: callbackUrl"),
    };
    if Url::parse(&callback_url).is_err() {
        return bad_request("Field 'callbackUrl' is not a valid URL");
    }
    let ignore_patterns: Vec<String> = match body.get("ignorePatterns") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(_) => return bad_request("Field 'ignorePatterns' must be an array of strings"),
    };

    info!("Watch requested for {:?}", path);

    tokio::spawn(async move {
        if let Err(e) = state
            .registry
            .start_watching(&path, &callback_url, ignore_patterns)
        {
            // Fire-and-forget contract: establishment failures only show
            // up in the log, the 202 has already gone out.
            error!("Failed to establish watch on {:?}: {}", path, e);
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

/// POST /unwatch  body: {path}
///
/// 200 also covers the no-existing-watch case (idempotent stop).
pub async fn unwatch(State(state): State<AgentState>, Json(body): Json<Value>) -> Response {
    let path = match body.get("path").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => p,
        _ => return bad_request("Missing or invalid field: path"),
    };

    state.registry.stop_watching(Path::new(path));
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
