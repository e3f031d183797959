// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One-time ticket verification against the external authorization service

use crate::config::TicketServiceConfig;
use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use podterm_contract::{validation::authorize_ticket, Authorization, TicketRecord};
use podterm_logging::redact;
use reqwest::Client as HttpClient;
use tracing::debug;
use url::Url;

/// Reasons a ticket does not yield an authorization. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketError {
    /// The ticket service could not be reached or timed out
    #[error("ticket service unreachable: {0}")]
    Network(String),

    /// The ticket service answered with a non-success status
    #[error("ticket rejected with status {status}")]
    Rejected { status: u16 },

    /// The response body could not be decoded into a usable ticket
    #[error("malformed ticket response: {0}")]
    Malformed(String),
}

/// Exchanges a ticket value for the authorization it carries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketVerifier: Send + Sync {
    async fn verify(&self, ticket_value: &str) -> Result<Authorization, TicketError>;
}

/// Verifies tickets with `GET <base>/visit/pod/ticket/check?ticket_value=...`
#[derive(Debug, Clone)]
pub struct HttpTicketVerifier {
    http_client: HttpClient,
    check_url: Url,
}

impl HttpTicketVerifier {
    /// Build a verifier with a bounded request timeout. Results are never cached.
    pub fn new(config: &TicketServiceConfig) -> ServerResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("podterm-server/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|err| ServerError::Config(format!("ticket http client: {err}")))?;

        Ok(Self {
            http_client,
            check_url: config.check_url()?,
        })
    }

    pub fn check_url(&self) -> &Url {
        &self.check_url
    }
}

#[async_trait]
impl TicketVerifier for HttpTicketVerifier {
    async fn verify(&self, ticket_value: &str) -> Result<Authorization, TicketError> {
        let mut url = self.check_url.clone();
        url.query_pairs_mut().append_pair("ticket_value", ticket_value);

        debug!(ticket = %redact(ticket_value), url = %self.check_url, "checking ticket");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|err| TicketError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TicketError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|err| TicketError::Network(err.to_string()))?;
        let record: TicketRecord =
            serde_json::from_slice(&body).map_err(|err| TicketError::Malformed(err.to_string()))?;

        debug!(
            ticket_id = record.id,
            user_id = record.user_id,
            namespace = %record.namespace_name,
            pod = %record.pod_name,
            "ticket accepted"
        );

        authorize_ticket(record).map_err(|err| TicketError::Malformed(err.to_string()))
    }
}
