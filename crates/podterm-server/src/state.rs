// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use crate::bridge::ExecBridge;
use crate::config::ServerConfig;
use crate::exec::ExecTransport;
use crate::session::SessionHandler;
use crate::ticket::TicketVerifier;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// Verifies tickets and bridges authorized sessions
    pub sessions: Arc<SessionHandler>,

    /// One permit per running terminal session
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TicketVerifier>,
        transport: Arc<dyn ExecTransport>,
    ) -> Self {
        let bridge = ExecBridge::new(transport, config.exec.clone());
        let permits = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            sessions: Arc::new(SessionHandler::new(verifier, bridge)),
            permits,
            config,
        }
    }

    /// Number of terminal sessions currently holding a permit
    pub fn active_sessions(&self) -> usize {
        self.config.max_sessions.saturating_sub(self.permits.available_permits())
    }

    /// Get configuration reference
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
