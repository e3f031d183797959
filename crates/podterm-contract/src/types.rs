// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Contract types for the podterm terminal service

use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Ticket record returned by the ticket check endpoint of the authorization
/// service.
///
/// Every field may be absent in the response body and falls back to its zero
/// value. Only `namespace_name` and `pod_name` are required before a terminal
/// session may be opened, which [`crate::validation::authorize_ticket`] checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TicketRecord {
    pub id: i64,
    #[validate(length(min = 1))]
    pub namespace_name: String,
    #[validate(length(min = 1))]
    pub pod_name: String,
    pub ticket: String,
    pub user_id: i64,
    /// Unix timestamp of issuance. Expiry is enforced by the issuing service.
    pub create_at: i64,
}

/// Target of a verified ticket.
///
/// This is the only source of the namespace and pod a session may exec into;
/// values supplied by the client are never consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub namespace: String,
    pub workload_name: String,
    pub user_id: i64,
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workload_name)
    }
}

/// Terminal dimensions carried by a resize control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// A terminal with no addressable cells; such resizes are dropped.
    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// JSON control message sent by the browser in a WebSocket text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Terminal input typed as text
    Stdin { data: String },
    /// The browser terminal changed its dimensions
    Resize { cols: u16, rows: u16 },
}

impl ClientFrame {
    /// Decode a text frame payload
    pub fn from_text(text: &str) -> Result<Self, crate::ContractError> {
        Ok(serde_json::from_str(text)?)
    }
}
