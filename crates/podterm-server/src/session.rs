// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Terminal session lifecycle: ticket verification, then the exec bridge

use crate::bridge::{BridgeError, ExecBridge, SessionEnd};
use crate::error::ServerResult;
use crate::terminal::TerminalIo;
use crate::ticket::TicketVerifier;
use podterm_contract::Authorization;
use podterm_logging::redact;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorized,
    Streaming,
    Closed(SessionOutcome),
}

impl SessionState {
    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authorized)
                | (Authorized, Streaming)
                | (Authorized, Closed(_))
                | (Streaming, Closed(_))
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authorized => write!(f, "authorized"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Closed(SessionOutcome::Ok) => write!(f, "closed(ok)"),
            SessionState::Closed(SessionOutcome::Error) => write!(f, "closed(error)"),
        }
    }
}

/// State machine of one session. Transitions only move forward.
#[derive(Debug)]
pub struct SessionLifecycle {
    history: StdMutex<Vec<SessionState>>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            history: StdMutex::new(vec![SessionState::Connecting]),
        }
    }

    pub fn state(&self) -> SessionState {
        let history = self.lock_history();
        history.last().copied().unwrap_or(SessionState::Connecting)
    }

    /// Every state entered so far, starting with `Connecting`
    pub fn history(&self) -> Vec<SessionState> {
        self.lock_history().clone()
    }

    /// Move to `next`. Returns false and leaves the state untouched when the
    /// transition is not allowed.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut history = self.lock_history();
        let current = history.last().copied().unwrap_or(SessionState::Connecting);
        if !current.can_advance_to(next) {
            warn!(from = %current, to = %next, "ignoring illegal session transition");
            return false;
        }
        history.push(next);
        true
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<SessionState>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An authorized session, ready to be bridged
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub authorization: Authorization,
    pub lifecycle: Arc<SessionLifecycle>,
}

/// Drives sessions from ticket to closed terminal
pub struct SessionHandler {
    verifier: Arc<dyn TicketVerifier>,
    bridge: ExecBridge,
}

impl SessionHandler {
    pub fn new(verifier: Arc<dyn TicketVerifier>, bridge: ExecBridge) -> Self {
        Self { verifier, bridge }
    }

    /// Verify `ticket_value`. On failure the lifecycle stays in `Connecting`
    /// and nothing is opened towards the cluster.
    pub async fn authorize(
        &self,
        ticket_value: &str,
        lifecycle: Arc<SessionLifecycle>,
    ) -> ServerResult<Session> {
        let authorization = match self.verifier.verify(ticket_value).await {
            Ok(authorization) => authorization,
            Err(err) => {
                warn!(ticket = %redact(ticket_value), error = %err, "ticket verification failed");
                return Err(err.into());
            }
        };

        lifecycle.advance(SessionState::Authorized);
        let session = Session {
            id: Uuid::new_v4(),
            authorization,
            lifecycle,
        };
        info!(
            session_id = %session.id,
            user_id = session.authorization.user_id,
            target_pod = %session.authorization,
            "ticket accepted"
        );
        Ok(session)
    }

    /// Bridge an authorized session to `terminal` until either side ends
    pub async fn run(
        &self,
        session: Session,
        terminal: Arc<dyn TerminalIo>,
    ) -> Result<SessionEnd, BridgeError> {
        let span = info_span!(
            "terminal_session",
            session_id = %session.id,
            namespace = %session.authorization.namespace,
            pod = %session.authorization.workload_name,
        );

        async move {
            let result = self
                .bridge
                .run(&session.authorization, terminal, &session.lifecycle)
                .await;
            info!(state = %session.lifecycle.state(), "terminal session closed");
            result
        }
        .instrument(span)
        .await
    }

    /// Close out a session whose WebSocket upgrade never completed. The
    /// ticket is already spent and nothing was opened towards the cluster.
    pub fn abandon(&self, session: &Session, reason: impl fmt::Display) {
        session
            .lifecycle
            .advance(SessionState::Closed(SessionOutcome::Error));
        warn!(
            session_id = %session.id,
            target_pod = %session.authorization,
            error = %reason,
            "terminal upgrade failed"
        );
    }
}
