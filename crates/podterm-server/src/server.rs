// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use crate::config::ServerConfig;
use crate::dependencies::DefaultServerDependencies;
use crate::error::{ServerError, ServerResult};
use crate::handlers;
use crate::state::AppState;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Terminal bridge server
pub struct Server {
    config: ServerConfig,
    app: Router,
}

impl Server {
    /// Create a server wired to the ticket service and the cluster
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let state = DefaultServerDependencies::new(config.clone()).await?.into_state();
        Self::with_state(config, state).await
    }

    /// Construct a server from an already-built app state (used for custom dependencies)
    pub async fn with_state(config: ServerConfig, state: AppState) -> ServerResult<Self> {
        config.validate()?;
        let app = Self::build_app(state);
        Ok(Self { config, app })
    }

    /// Build the Axum application with routes and middleware
    fn build_app(state: AppState) -> Router {
        let middleware_stack = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http());

        Router::new()
            .route("/ws", get(handlers::terminal::terminal_connect))
            .route("/healthz", get(handlers::health::health_check))
            .route("/readyz", get(handlers::health::readiness_check))
            .route("/version", get(handlers::health::version))
            .with_state(state)
            .layer(middleware_stack)
    }

    /// Run the server until the listener fails
    pub async fn run(self) -> ServerResult<()> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Starting terminal server on {}", listener.local_addr()?);

        axum::serve(listener, self.app)
            .await
            .map_err(|err| ServerError::Internal(format!("server error: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_dependencies::{
        MockServerDependencies, RecordingExecTransport, RemoteBehavior, StaticTicketVerifier,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(config: ServerConfig) -> Router {
        let state = MockServerDependencies::new(
            config,
            Arc::new(StaticTicketVerifier::new()),
            Arc::new(RecordingExecTransport::new(RemoteBehavior::Echo)),
        )
        .into_state();
        Server::build_app(state)
    }

    #[tokio::test]
    async fn healthz_answers_ok_with_request_id() {
        let response = app(ServerConfig::default())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn readyz_reports_capacity() {
        let config = ServerConfig {
            max_sessions: 3,
            ..ServerConfig::default()
        };
        let response = app(config)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["activeSessions"], 0);
        assert_eq!(json["maxSessions"], 3);
    }

    #[tokio::test]
    async fn plain_http_to_terminal_endpoint_is_refused() {
        let response = app(ServerConfig::default())
            .oneshot(Request::get("/ws?ticket_value=T1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = ServerConfig {
            max_sessions: 0,
            ..ServerConfig::default()
        };
        let state = MockServerDependencies::new(
            ServerConfig::default(),
            Arc::new(StaticTicketVerifier::new()),
            Arc::new(RecordingExecTransport::new(RemoteBehavior::Echo)),
        )
        .into_state();
        assert!(matches!(
            Server::with_state(config, state).await,
            Err(ServerError::Config(_))
        ));
    }
}
