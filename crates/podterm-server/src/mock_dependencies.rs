// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process stand-ins for the ticket service and the cluster.
//!
//! Used by unit tests, the integration tests and local demos; nothing here
//! talks to the network.

use crate::{
    config::ServerConfig,
    exec::{ExecError, ExecOutcome, ExecRequest, ExecResult, ExecStream, ExecTransport, ResizeSink},
    state::AppState,
    ticket::{TicketError, TicketVerifier},
};
use async_trait::async_trait;
use futures::FutureExt;
use podterm_contract::{Authorization, TerminalSize};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

const PIPE_CAPACITY: usize = 64 * 1024;

/// How long the `wait_for_*` helpers poll before giving up
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Ticket verifier answering from a fixed table. Unknown tickets are
/// rejected with 404, like the real service.
#[derive(Debug, Default)]
pub struct StaticTicketVerifier {
    tickets: HashMap<String, Result<Authorization, TicketError>>,
    calls: StdMutex<Vec<String>>,
}

impl StaticTicketVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, ticket_value: &str, authorization: Authorization) -> Self {
        self.tickets.insert(ticket_value.to_string(), Ok(authorization));
        self
    }

    pub fn with_error(mut self, ticket_value: &str, error: TicketError) -> Self {
        self.tickets.insert(ticket_value.to_string(), Err(error));
        self
    }

    /// Ticket values seen so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl TicketVerifier for StaticTicketVerifier {
    async fn verify(&self, ticket_value: &str) -> Result<Authorization, TicketError> {
        lock(&self.calls).push(ticket_value.to_string());
        self.tickets
            .get(ticket_value)
            .cloned()
            .unwrap_or(Err(TicketError::Rejected { status: 404 }))
    }
}

/// What the fake remote process does once a stream is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBehavior {
    /// Print `output`, then exit with `code`
    Exit { output: Vec<u8>, code: i32 },
    /// Echo stdin back on stdout until stdin closes or the stream is cancelled
    Echo,
    /// Keep stdin open without ever reading it until cancelled
    IgnoreInput,
    /// Close stdin right away, then run until cancelled
    ClosedStdin,
    /// Interleave `stdout` and `stderr` byte by byte on separate pipes, then
    /// exit with `code`
    SplitOutput {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        code: i32,
    },
    /// Refuse to open the stream
    RejectOpen(String),
    /// Open the stream, then fail it
    FailStream(String),
}

/// Everything observed about one opened stream
#[derive(Debug, Clone)]
struct RecordedExec {
    request: ExecRequest,
    stdin: Arc<StdMutex<Vec<u8>>>,
    resizes: Arc<StdMutex<Vec<TerminalSize>>>,
    cancelled: Arc<AtomicBool>,
}

impl RecordedExec {
    fn new(request: ExecRequest) -> Self {
        Self {
            request,
            stdin: Arc::default(),
            resizes: Arc::default(),
            cancelled: Arc::default(),
        }
    }
}

/// Exec transport that records every request and fakes the remote process
/// with in-memory pipes
#[derive(Debug)]
pub struct RecordingExecTransport {
    behavior: RemoteBehavior,
    execs: StdMutex<Vec<RecordedExec>>,
}

impl RecordingExecTransport {
    pub fn new(behavior: RemoteBehavior) -> Self {
        Self {
            behavior,
            execs: StdMutex::new(Vec::new()),
        }
    }

    /// Number of `open` calls, including refused ones
    pub fn open_count(&self) -> usize {
        lock(&self.execs).len()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        lock(&self.execs).iter().map(|exec| exec.request.clone()).collect()
    }

    /// Bytes the `index`-th remote process received on stdin
    pub fn stdin(&self, index: usize) -> Vec<u8> {
        self.exec(index).map(|exec| snapshot(&exec.stdin)).unwrap_or_default()
    }

    /// Terminal sizes delivered to the `index`-th remote process
    pub fn resizes(&self, index: usize) -> Vec<TerminalSize> {
        self.exec(index).map(|exec| snapshot(&exec.resizes)).unwrap_or_default()
    }

    pub fn was_cancelled(&self, index: usize) -> bool {
        self.exec(index)
            .map(|exec| exec.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub async fn wait_for_opens(&self, count: usize) {
        self.wait_until(|transport| transport.open_count() >= count).await;
    }

    pub async fn wait_for_resizes(&self, index: usize, count: usize) {
        self.wait_until(|transport| transport.resizes(index).len() >= count).await;
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while !condition(self) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn exec(&self, index: usize) -> Option<RecordedExec> {
        lock(&self.execs).get(index).cloned()
    }
}

#[async_trait]
impl ExecTransport for RecordingExecTransport {
    async fn open(&self, request: ExecRequest) -> ExecResult<ExecStream> {
        let record = RecordedExec::new(request);
        lock(&self.execs).push(record.clone());

        if let RemoteBehavior::RejectOpen(message) = &self.behavior {
            return Err(ExecError::Open(message.clone()));
        }

        let (bridge_stdin, remote_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_stdout, bridge_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_stderr, bridge_stderr) = match self.behavior {
            RemoteBehavior::SplitOutput { .. } => {
                let (remote, bridge) = tokio::io::duplex(PIPE_CAPACITY);
                (Some(remote), Some(bridge))
            }
            _ => (None, None),
        };
        let cancel = CancellationToken::new();

        let remote = tokio::spawn(run_remote(
            self.behavior.clone(),
            remote_stdin,
            remote_stdout,
            remote_stderr,
            record.clone(),
            cancel.clone(),
        ));
        let completion = async move {
            remote
                .await
                .map_err(|err| ExecError::Stream(format!("remote task: {err}")))?
        }
        .boxed();

        let resizes = Arc::clone(&record.resizes);
        let resize: ResizeSink = Box::pin(futures::sink::unfold(
            resizes,
            |resizes, size: TerminalSize| async move {
                lock(&resizes).push(size);
                Ok::<_, ExecError>(resizes)
            },
        ));

        let stderr = bridge_stderr.map(|pipe| -> Box<dyn AsyncRead + Send + Unpin> {
            Box::new(pipe)
        });

        Ok(ExecStream {
            stdin: Box::new(bridge_stdin),
            stdout: Box::new(bridge_stdout),
            stderr,
            resize,
            completion,
            cancel,
        })
    }
}

async fn run_remote(
    behavior: RemoteBehavior,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    stderr: Option<DuplexStream>,
    record: RecordedExec,
    cancel: CancellationToken,
) -> ExecResult<ExecOutcome> {
    match behavior {
        RemoteBehavior::Exit { output, code } => {
            stdout.write_all(&output).await.map_err(stream_error)?;
            Ok(ExecOutcome::Exited { code: Some(code) })
        }
        RemoteBehavior::Echo => {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        record.cancelled.store(true, Ordering::SeqCst);
                        return Ok(ExecOutcome::Cancelled);
                    }
                    read = stdin.read(&mut buf) => match read {
                        Ok(0) | Err(_) => return Ok(ExecOutcome::Exited { code: Some(0) }),
                        Ok(n) => {
                            lock(&record.stdin).extend_from_slice(&buf[..n]);
                            if stdout.write_all(&buf[..n]).await.is_err() {
                                return Ok(ExecOutcome::Exited { code: Some(0) });
                            }
                        }
                    }
                }
            }
        }
        RemoteBehavior::IgnoreInput => {
            let _held = stdin;
            Ok(until_cancelled(&record, &cancel).await)
        }
        RemoteBehavior::ClosedStdin => {
            drop(stdin);
            Ok(until_cancelled(&record, &cancel).await)
        }
        RemoteBehavior::SplitOutput {
            stdout: out,
            stderr: err,
            code,
        } => {
            let mut stderr =
                stderr.ok_or_else(|| ExecError::Stream("stderr pipe missing".into()))?;
            for index in 0..out.len().max(err.len()) {
                if let Some(byte) = out.get(index) {
                    stdout.write_all(&[*byte]).await.map_err(stream_error)?;
                }
                if let Some(byte) = err.get(index) {
                    stderr.write_all(&[*byte]).await.map_err(stream_error)?;
                }
                tokio::task::yield_now().await;
            }
            Ok(ExecOutcome::Exited { code: Some(code) })
        }
        RemoteBehavior::FailStream(message) => Err(ExecError::Stream(message)),
        RemoteBehavior::RejectOpen(message) => Err(ExecError::Open(message)),
    }
}

async fn until_cancelled(record: &RecordedExec, cancel: &CancellationToken) -> ExecOutcome {
    cancel.cancelled().await;
    record.cancelled.store(true, Ordering::SeqCst);
    ExecOutcome::Cancelled
}

fn stream_error(err: std::io::Error) -> ExecError {
    ExecError::Stream(err.to_string())
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn snapshot<T: Clone>(mutex: &StdMutex<T>) -> T {
    lock(mutex).clone()
}

/// Dependency wiring for tests and demos
pub struct MockServerDependencies {
    state: AppState,
}

impl MockServerDependencies {
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TicketVerifier>,
        transport: Arc<dyn ExecTransport>,
    ) -> Self {
        Self {
            state: AppState::new(config, verifier, transport),
        }
    }

    /// Consume the dependency builder and return the resulting app state
    pub fn into_state(self) -> AppState {
        self.state
    }
}
