//! Configuration management
//!
//! Three JSON files feed the bot: the main config (token, username, loop
//! settings), the permission table and the server registry. Everything is
//! validated here so the event loop only ever sees well-formed tables.

use crate::permissions::PermissionTable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable that overrides the configured bot token
pub const TOKEN_ENV: &str = "SLACK_API_TOKEN";

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("permission entry '{command}' must be null or a list of usernames, found {found}")]
    InvalidPermission { command: String, found: String },

    #[error("server registry entry #{index} is invalid: {reason}")]
    InvalidServer { index: usize, reason: String },

    #[error("permission entry '{0}' is defined more than once (names are case-insensitive)")]
    DuplicatePermission(String),

    #[error("duplicate server id '{0}' in registry")]
    DuplicateServer(String),

    #[error("no bot token: set \"token\" in the config file or SLACK_API_TOKEN")]
    MissingToken,
}

/// One managed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub info: String,
}

impl ServerSpec {
    pub fn new(id: &str, name: &str, image: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            info: String::new(),
        }
    }

    pub fn with_info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }
}

/// Ordered, id-unique list of managed servers
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<ServerSpec>,
}

impl ServerRegistry {
    /// Build a registry, rejecting empty fields and duplicate ids
    pub fn new(servers: Vec<ServerSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(servers.len());

        for (index, spec) in servers.iter().enumerate() {
            for (field, value) in [("id", &spec.id), ("name", &spec.name), ("image", &spec.image)] {
                if value.trim().is_empty() {
                    return Err(ConfigError::InvalidServer {
                        index,
                        reason: format!("`{}` is empty", field),
                    });
                }
            }
            if !seen.insert(spec.id.clone()) {
                return Err(ConfigError::DuplicateServer(spec.id.clone()));
            }
        }

        Ok(Self { servers })
    }

    pub fn get(&self, id: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerSpec> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Docker runtime section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub docker_bin: String,
    pub timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Contents of the main config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub token: Option<String>,
    pub username: Option<String>,
    pub poll_interval_ms: u64,
    pub api_base: Option<String>,
    pub runtime: RuntimeSettings,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            token: None,
            username: None,
            poll_interval_ms: 1000,
            api_base: None,
            runtime: RuntimeSettings::default(),
        }
    }
}

/// Fully resolved bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token (env override already applied)
    pub token: String,
    /// Bot username, used to find our identity if the identity query fails
    pub username: Option<String>,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Slack Web API base URL override
    pub api_base: Option<String>,
    pub runtime: RuntimeSettings,
    pub permissions: PermissionTable,
    pub servers: ServerRegistry,
}

impl Config {
    /// Load all three files and apply the token override from the environment
    pub fn load(
        config_path: &Path,
        permissions_path: &Path,
        servers_path: &Path,
        lenient_permissions: bool,
    ) -> Result<Self, ConfigError> {
        let env_token = std::env::var(TOKEN_ENV).ok();
        Self::load_with_token(
            config_path,
            permissions_path,
            servers_path,
            lenient_permissions,
            env_token,
        )
    }

    /// Same as `load`, with the environment token passed explicitly
    pub fn load_with_token(
        config_path: &Path,
        permissions_path: &Path,
        servers_path: &Path,
        lenient_permissions: bool,
        env_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}...", config_path.display());
        let file: FileConfig = read_json(config_path)?;

        info!("Loading permissions from {}...", permissions_path.display());
        let doc: serde_json::Value = read_json(permissions_path)?;
        let permissions = PermissionTable::from_json(&doc, lenient_permissions)?;
        debug!("Permissions loaded: {} commands.", permissions.len());

        info!("Loading servers from {}...", servers_path.display());
        let specs: Vec<ServerSpec> = read_json(servers_path)?;
        let servers = ServerRegistry::new(specs)?;
        debug!("Servers loaded: {}.", servers.len());

        let token = match env_token.filter(|t| !t.is_empty()) {
            Some(t) => {
                info!("Overriding token from configuration with environment {}.", TOKEN_ENV);
                t
            }
            None => file
                .token
                .filter(|t| !t.is_empty())
                .ok_or(ConfigError::MissingToken)?,
        };

        Ok(Self {
            token,
            username: file.username,
            poll_interval: Duration::from_millis(file.poll_interval_ms.max(1)),
            api_base: file.api_base,
            runtime: file.runtime,
            permissions,
            servers,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand `~` and `$VARS` in a path given on the command line
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}
