// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! WebSocket terminal endpoint.
//!
//! The ticket is verified before the upgrade is accepted, so a rejected
//! ticket is answered with a plain HTTP error and never reaches the cluster.

use crate::error::ServerError;
use crate::session::SessionLifecycle;
use crate::state::AppState;
use crate::terminal::{TerminalIo, WsTerminal};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub ticket_value: Option<String>,
}

/// `GET /ws?ticket_value=...`
pub async fn terminal_connect(
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket_value) = query.ticket_value.filter(|value| !value.is_empty()) else {
        return ServerError::MissingTicket.into_response();
    };

    let permit = match Arc::clone(&state.permits).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            debug!(active = state.active_sessions(), "terminal session limit reached");
            return ServerError::TooManySessions.into_response();
        }
    };

    let lifecycle = Arc::new(SessionLifecycle::new());
    let session = match state.sessions.authorize(&ticket_value, lifecycle).await {
        Ok(session) => session,
        Err(err) => return err.into_response(),
    };

    let sessions = Arc::clone(&state.sessions);
    let pending = session.clone();
    ws.on_failed_upgrade(move |err| sessions.abandon(&pending, err))
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            let (sink, stream) = socket.split();
            let terminal: Arc<dyn TerminalIo> = Arc::new(WsTerminal::new(sink, stream));
            // Failures are logged and reported on the terminal by the session.
            let _ = state.sessions.run(session, terminal).await;
        })
        .into_response()
}
