// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for contract validation and parsing

use thiserror::Error;

/// Errors that can occur while decoding or validating contract types
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ticket does not name a target workload: {0}")]
    MissingTarget(String),

    #[error("Invalid terminal size: {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },
}

/// Problem+JSON error response format as per RFC 7807
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub detail: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty", default)]
    pub errors: std::collections::HashMap<String, Vec<String>>,
}
