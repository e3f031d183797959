// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Remote command execution inside pods.
//!
//! [`ExecTransport`] is the seam between the bridge and the cluster. The
//! production implementation talks to the Kubernetes `pods/exec` subresource
//! through a single [`kube::Client`] built at startup and shared read-only by
//! every session.

use crate::config::ExecConfig;
use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt, Sink, SinkExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
    api::{AttachParams, TerminalSize as KubeTerminalSize},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use podterm_contract::{Authorization, TerminalSize};
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// Cluster credentials could not be loaded
    #[error("cluster configuration: {0}")]
    Config(String),

    /// The exec stream could not be established (pod missing, forbidden, ...)
    #[error("cannot open exec stream: {0}")]
    Open(String),

    /// The established stream failed
    #[error("exec stream failed: {0}")]
    Stream(String),
}

/// What to run and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: Option<String>,
    pub command: Vec<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl ExecRequest {
    /// Interactive shell with a pseudo-terminal in the authorized pod.
    ///
    /// The target comes from the verified authorization only.
    pub fn interactive_shell(authorization: &Authorization, config: &ExecConfig) -> Self {
        Self {
            namespace: authorization.namespace.clone(),
            pod: authorization.workload_name.clone(),
            container: config.container.clone(),
            command: config.command.clone(),
            stdin: true,
            stdout: true,
            stderr: true,
            tty: true,
        }
    }
}

/// How a remote process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The process exited; `None` when the cluster did not report a code
    Exited { code: Option<i32> },
    /// The stream was torn down through [`ExecStream::cancel`]
    Cancelled,
}

pub type ResizeSink = Pin<Box<dyn Sink<TerminalSize, Error = ExecError> + Send>>;

/// Handles to a running remote process
pub struct ExecStream {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Absent in TTY mode, where the cluster merges stderr into stdout
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub resize: ResizeSink,
    /// Resolves when the remote process ends or the stream fails
    pub completion: BoxFuture<'static, ExecResult<ExecOutcome>>,
    pub cancel: CancellationToken,
}

impl ExecStream {
    /// Ask the transport to tear the remote process down
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Opens remote execution streams
#[async_trait]
pub trait ExecTransport: Send + Sync {
    async fn open(&self, request: ExecRequest) -> ExecResult<ExecStream>;
}

/// Exec transport backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeExecTransport {
    client: Client,
}

impl KubeExecTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the shared client from an explicit kubeconfig, or infer it from
    /// `KUBECONFIG` / `~/.kube/config` / the in-cluster service account.
    pub async fn connect(kubeconfig: Option<&Path>) -> ExecResult<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|err| ExecError::Config(format!("{}: {}", path.display(), err)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|err| ExecError::Config(err.to_string()))?
            }
            None => Config::infer().await.map_err(|err| ExecError::Config(err.to_string()))?,
        };

        info!(cluster = %config.cluster_url, "kubernetes client configured");
        let client = Client::try_from(config).map_err(|err| ExecError::Config(err.to_string()))?;
        Ok(Self::new(client))
    }

    fn attach_params(request: &ExecRequest) -> AttachParams {
        // The API server rejects stderr together with a TTY; the TTY stream
        // carries both.
        let params = AttachParams::default()
            .stdin(request.stdin)
            .stdout(request.stdout)
            .stderr(request.stderr && !request.tty)
            .tty(request.tty);
        match &request.container {
            Some(container) => params.container(container.clone()),
            None => params,
        }
    }
}

#[async_trait]
impl ExecTransport for KubeExecTransport {
    async fn open(&self, request: ExecRequest) -> ExecResult<ExecStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let params = Self::attach_params(&request);

        debug!(
            namespace = %request.namespace,
            pod = %request.pod,
            command = ?request.command,
            "opening exec stream"
        );

        let mut attached = pods
            .exec(&request.pod, request.command.clone(), &params)
            .await
            .map_err(|err| ExecError::Open(err.to_string()))?;

        let stdin = attached
            .stdin()
            .ok_or_else(|| ExecError::Open("stdin was not attached".into()))?;
        let stdout = attached
            .stdout()
            .ok_or_else(|| ExecError::Open("stdout was not attached".into()))?;
        let stderr = attached
            .stderr()
            .map(|stream| Box::new(stream) as Box<dyn AsyncRead + Send + Unpin>);
        let status = attached.take_status();

        let resize: ResizeSink = match attached.terminal_size() {
            Some(sender) => Box::pin(
                sender
                    .sink_map_err(|err| ExecError::Stream(format!("resize channel: {err}")))
                    .with(|size: TerminalSize| {
                        futures::future::ready(Ok::<_, ExecError>(KubeTerminalSize {
                            width: size.cols,
                            height: size.rows,
                        }))
                    }),
            ),
            None => Box::pin(
                futures::sink::drain::<TerminalSize>()
                    .sink_map_err(|never| -> ExecError { match never {} }),
            ),
        };

        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let completion = async move {
            let status = async move {
                match status {
                    Some(status) => status.await,
                    None => None,
                }
            };

            tokio::select! {
                _ = cancelled.cancelled() => {
                    attached.abort();
                    Ok(ExecOutcome::Cancelled)
                }
                status = status => {
                    attached
                        .join()
                        .await
                        .map_err(|err| ExecError::Stream(err.to_string()))?;
                    outcome_from_status(status)
                }
            }
        }
        .boxed();

        Ok(ExecStream {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr,
            resize,
            completion,
            cancel,
        })
    }
}

/// Interpret the `Status` object sent on the exec error channel.
///
/// A non-zero exit is a normal end of the session, any other failure is a
/// stream error.
fn outcome_from_status(status: Option<Status>) -> ExecResult<ExecOutcome> {
    let Some(status) = status else {
        return Ok(ExecOutcome::Exited { code: None });
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(ExecOutcome::Exited { code: Some(0) });
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|details| details.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
                    .and_then(|cause| cause.message.as_deref())
                    .and_then(|message| message.parse::<i32>().ok())
            });
        return Ok(ExecOutcome::Exited { code });
    }

    Err(ExecError::Stream(
        status.message.unwrap_or_else(|| "remote command failed".to_string()),
    ))
}
