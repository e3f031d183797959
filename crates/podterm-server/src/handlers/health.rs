// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Health check endpoints

use crate::state::AppState;
use crate::ServerResult;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Readiness response with session capacity
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub status: String,
    pub timestamp: String,
    pub active_sessions: usize,
    pub max_sessions: usize,
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
}

/// Liveness: the process is up and serving HTTP
pub async fn health_check() -> ServerResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Readiness: reports `busy` while every session permit is taken
pub async fn readiness_check(
    State(state): State<AppState>,
) -> ServerResult<Json<ReadinessResponse>> {
    let active_sessions = state.active_sessions();
    let max_sessions = state.config().max_sessions;
    let status = if active_sessions < max_sessions { "ready" } else { "busy" };

    Ok(Json(ReadinessResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        active_sessions,
        max_sessions,
    }))
}

pub async fn version() -> ServerResult<Json<VersionResponse>> {
    Ok(Json(VersionResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
