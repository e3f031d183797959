// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration
//!
//! Defaults are compiled in; a TOML file passed with `--config` overrides
//! them, and command-line flags override the file.

use crate::error::{ServerError, ServerResult};
use podterm_logging::LoggingConfig;
use serde::Deserialize;
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tokio::sync::Semaphore;
use url::Url;

/// Path of the ticket check endpoint below the authorization service base URL
pub const TICKET_CHECK_PATH: &str = "visit/pod/ticket/check";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,

    /// Upper bound on concurrently running terminal sessions
    pub max_sessions: usize,

    /// External ticket service
    pub ticket: TicketServiceConfig,

    /// Remote command execution
    pub exec: ExecConfig,

    /// Logging defaults, overridable from the command line
    pub logging: LoggingConfig,

    /// Configuration file this config was loaded from
    #[serde(skip)]
    pub config_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            max_sessions: 64,
            ticket: TicketServiceConfig::default(),
            exec: ExecConfig::default(),
            logging: LoggingConfig::default(),
            config_file: None,
        }
    }
}

impl ServerConfig {
    /// Load a configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ServerError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let mut config = Self::from_toml(&raw)
            .map_err(|err| ServerError::Config(format!("{}: {}", path.display(), err)))?;
        config.config_file = Some(path.display().to_string());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(raw: &str) -> ServerResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| ServerError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_sessions == 0 {
            return Err(ServerError::Config("max-sessions must be at least 1".into()));
        }
        if self.max_sessions > Semaphore::MAX_PERMITS {
            return Err(ServerError::Config(format!(
                "max-sessions must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.exec.command.is_empty() {
            return Err(ServerError::Config("exec.command must not be empty".into()));
        }
        self.ticket.check_url()?;
        Ok(())
    }
}

/// Ticket service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TicketServiceConfig {
    /// Base URL of the authorization API, e.g. `http://localhost:8888/api`
    pub base_url: String,

    /// Request timeout for the ticket check (seconds)
    pub timeout_secs: u64,
}

impl Default for TicketServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8888/api".to_string(),
            timeout_secs: 10,
        }
    }
}

impl TicketServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the ticket check endpoint.
    ///
    /// The base URL usually carries a path prefix (`/api`), so the check path
    /// is appended rather than resolved with `Url::join`.
    pub fn check_url(&self) -> ServerResult<Url> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), TICKET_CHECK_PATH);
        Url::parse(&raw)
            .map_err(|err| ServerError::Config(format!("invalid ticket base url {raw}: {err}")))
    }
}

/// Remote execution configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ExecConfig {
    /// Command started in the container for every session
    pub command: Vec<String>,

    /// Container to exec into; the pod's default container when unset
    pub container: Option<String>,

    /// Kubeconfig to load; inferred from the environment when unset
    pub kubeconfig: Option<PathBuf>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command: vec!["bash".to_string()],
            container: None,
            kubeconfig: None,
        }
    }
}
