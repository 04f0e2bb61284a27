//! Service configuration parsing (promptstack.toml)
//!
//! One TOML file configures both services: the `[agent]` section for the
//! filesystem agent, the `[server]` section (including `[server.workspaces.*]`
//! tables) for the main server. Every knob has a default so an empty or
//! missing file yields a runnable local setup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::workspace::WorkspaceConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "promptstack.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Top-level configuration for both binaries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Filesystem agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    /// Allowed CORS origins; `"*"` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Quiet period before coalesced watch events are flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Events deeper than this many path segments below the watched root
    /// are dropped to cap pathological tree cost.
    #[serde(default = "default_max_watch_depth")]
    pub max_watch_depth: usize,
    /// Timeout for a single change-notification POST to the callback URL.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_agent_port(),
            cors_origins: default_cors_origins(),
            debounce_ms: default_debounce_ms(),
            max_watch_depth: default_max_watch_depth(),
            callback_timeout_ms: default_callback_timeout_ms(),
        }
    }
}

/// Main server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Externally reachable base URL of this server, used to build the
    /// callback URL handed to the agent. Defaults to the listen address.
    pub public_base_url: Option<String>,
    /// Base URL of the filesystem agent.
    #[serde(default = "default_agent_base_url")]
    pub agent_base_url: String,
    /// Timeout for HTTP calls to the agent.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
    /// Global ignore patterns applied to every workspace.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Known workspaces, keyed by workspace id.
    #[serde(default)]
    pub workspaces: HashMap<String, WorkspaceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            public_base_url: None,
            agent_base_url: default_agent_base_url(),
            agent_timeout_ms: default_agent_timeout_ms(),
            ignore_patterns: Vec::new(),
            workspaces: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Resolve the base URL the agent should call back to.
    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                // A wildcard listen address is not reachable as a URL host.
                let host = if self.host == "0.0.0.0" || self.host == "::" {
                    "127.0.0.1"
                } else {
                    self.host.as_str()
                };
                format!("http://{}:{}", host, self.port)
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_agent_port() -> u16 {
    47831
}

fn default_server_port() -> u16 {
    47830
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_max_watch_depth() -> usize {
    25
}

fn default_callback_timeout_ms() -> u64 {
    3000
}

fn default_agent_base_url() -> String {
    format!("http://127.0.0.1:{}", default_agent_port())
}

fn default_agent_timeout_ms() -> u64 {
    5000
}

impl ServiceConfig {
    /// Load configuration from an explicit path, or from
    /// `promptstack.toml` in the working directory if present.
    ///
    /// An explicit path that does not exist is an error; the implicit
    /// default file is optional and its absence yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.display().to_string()));
                }
                p.to_path_buf()
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default.to_path_buf()
            }
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.agent.port, 47831);
        assert_eq!(config.agent.debounce_ms, 200);
        assert_eq!(config.server.port, 47830);
        assert!(config.server.workspaces.is_empty());
    }

    #[test]
    fn test_parse_workspaces() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [server]
            ignore_patterns = ["node_modules", "*.log"]

            [server.workspaces.ws1]
            root_path = "/tmp/proj"
            ignore_patterns = ["dist"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.ignore_patterns.len(), 2);
        let ws = config.server.workspaces.get("ws1").unwrap();
        assert_eq!(ws.root_path, std::path::PathBuf::from("/tmp/proj"));
        assert_eq!(ws.ignore_patterns, vec!["dist".to_string()]);
    }

    #[test]
    fn test_public_base_url_fallback() {
        let mut server = ServerConfig::default();
        assert_eq!(server.public_base_url(), "http://127.0.0.1:47830");

        server.host = "0.0.0.0".to_string();
        assert_eq!(server.public_base_url(), "http://127.0.0.1:47830");

        server.public_base_url = Some("https://ps.example.com/".to_string());
        assert_eq!(server.public_base_url(), "https://ps.example.com");
    }
}
