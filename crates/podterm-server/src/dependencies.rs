// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dependency wiring for the terminal server

use crate::{
    config::ServerConfig,
    error::ServerResult,
    exec::{ExecTransport, KubeExecTransport},
    state::AppState,
    ticket::{HttpTicketVerifier, TicketVerifier},
};
use std::sync::Arc;
use tracing::info;

/// Production dependencies: the HTTP ticket service and the cluster API
pub struct DefaultServerDependencies {
    state: AppState,
}

impl DefaultServerDependencies {
    /// Build the ticket client and the shared cluster client
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let verifier = HttpTicketVerifier::new(&config.ticket)?;
        info!(check_url = %verifier.check_url(), "ticket service configured");

        let transport = KubeExecTransport::connect(config.exec.kubeconfig.as_deref()).await?;

        let verifier: Arc<dyn TicketVerifier> = Arc::new(verifier);
        let transport: Arc<dyn ExecTransport> = Arc::new(transport);
        Ok(Self {
            state: AppState::new(config, verifier, transport),
        })
    }

    /// Consume the dependency builder and return the resulting app state
    pub fn into_state(self) -> AppState {
        self.state
    }
}
