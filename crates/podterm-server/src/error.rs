// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server error types and handling

use crate::exec::ExecError;
use crate::ticket::TicketError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use podterm_contract::ProblemDetails;

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Missing ticket_value query parameter")]
    MissingTicket,

    #[error("Ticket verification failed: {0}")]
    Ticket(#[from] TicketError),

    #[error("Too many concurrent terminal sessions")]
    TooManySessions,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exec transport error: {0}")]
    Exec(#[from] ExecError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Convert error to Problem+JSON response
    pub fn to_problem(&self) -> ProblemDetails {
        let (slug, title, status, detail) = match self {
            ServerError::MissingTicket => (
                "missing-ticket",
                "Missing Ticket",
                StatusCode::BAD_REQUEST,
                "The ticket_value query parameter is required".to_string(),
            ),
            ServerError::Ticket(TicketError::Rejected { status }) => (
                "ticket-rejected",
                "Ticket Rejected",
                StatusCode::UNAUTHORIZED,
                format!("Ticket service answered with status {}", status),
            ),
            ServerError::Ticket(err @ TicketError::Network(_)) => (
                "ticket-service-unavailable",
                "Ticket Service Unavailable",
                StatusCode::BAD_GATEWAY,
                err.to_string(),
            ),
            ServerError::Ticket(err @ TicketError::Malformed(_)) => (
                "ticket-malformed",
                "Malformed Ticket Response",
                StatusCode::BAD_GATEWAY,
                err.to_string(),
            ),
            ServerError::TooManySessions => (
                "rate-limited",
                "Too Many Sessions",
                StatusCode::TOO_MANY_REQUESTS,
                "The terminal session limit has been reached".to_string(),
            ),
            ServerError::Config(msg) => (
                "config",
                "Configuration Error",
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
            ),
            ServerError::Exec(err) => (
                "exec",
                "Exec Transport Error",
                StatusCode::BAD_GATEWAY,
                err.to_string(),
            ),
            ServerError::Internal(msg) => (
                "internal",
                "Internal Server Error",
                StatusCode::INTERNAL_SERVER_ERROR,
                msg.clone(),
            ),
        };

        ProblemDetails {
            problem_type: format!("https://docs.example.com/errors/{}", slug),
            title: title.to_string(),
            status: Some(status.as_u16()),
            detail,
            errors: Default::default(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let problem = self.to_problem();
        let status = problem
            .status
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

/// Convert IO errors
impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {}", err))
    }
}
