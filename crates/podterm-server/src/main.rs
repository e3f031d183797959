// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! podterm terminal server binary

use clap::Parser;
use podterm_logging::CliLoggingArgs;
use podterm_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); flags override its values
    #[arg(short, long, env = "PODTERM_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address for the server
    #[arg(short, long, env = "PODTERM_BIND")]
    bind: Option<SocketAddr>,

    /// Base URL of the ticket authorization API
    #[arg(long, env = "PODTERM_AUTH_BASE_URL")]
    auth_base_url: Option<String>,

    /// Ticket check timeout in seconds
    #[arg(long, env = "PODTERM_TICKET_TIMEOUT_SECS")]
    ticket_timeout_secs: Option<u64>,

    /// Kubeconfig to use instead of the inferred one
    #[arg(long, env = "PODTERM_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Container to exec into
    #[arg(long, env = "PODTERM_CONTAINER")]
    container: Option<String>,

    /// Command started for each session, comma separated
    #[arg(long, env = "PODTERM_SHELL", value_delimiter = ',')]
    shell: Option<Vec<String>>,

    /// Maximum number of concurrent terminal sessions
    #[arg(long, env = "PODTERM_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(url) = &self.auth_base_url {
            config.ticket.base_url = url.clone();
        }
        if let Some(secs) = self.ticket_timeout_secs {
            config.ticket.timeout_secs = secs;
        }
        if let Some(path) = &self.kubeconfig {
            config.exec.kubeconfig = Some(path.clone());
        }
        if let Some(container) = &self.container {
            config.exec.container = Some(container.clone());
        }
        if let Some(shell) = &self.shell {
            config.exec.command = shell.clone();
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    args.logging.clone().merge_config(&config.logging).init("podterm-server")?;

    tracing::info!(
        config_file = config.config_file.as_deref().unwrap_or("<defaults>"),
        ticket_service = %config.ticket.base_url,
        max_sessions = config.max_sessions,
        "Starting podterm terminal server"
    );

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            bind-addr = "0.0.0.0:7000"
            max-sessions = 8

            [ticket]
            base-url = "http://tickets.internal/api"
            "#
        )
        .unwrap();

        let args = Args::parse_from([
            "podterm-server",
            "--config",
            file.path().to_str().unwrap(),
            "--bind",
            "127.0.0.1:9100",
            "--shell",
            "/bin/sh,-l",
        ]);
        let config = args.load_config().unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.ticket.base_url, "http://tickets.internal/api");
        assert_eq!(config.exec.command, vec!["/bin/sh".to_string(), "-l".to_string()]);
    }

    #[test]
    fn out_of_range_session_limit_is_rejected() {
        let args = Args::parse_from(["podterm-server", "--max-sessions", "0"]);
        assert!(args.load_config().is_err());

        let huge = usize::MAX.to_string();
        let args = Args::parse_from(["podterm-server", "--max-sessions", huge.as_str()]);
        assert!(args.load_config().is_err());
    }
}
