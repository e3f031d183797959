// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Relay between a client terminal and a remote exec stream.
//!
//! Per session the bridge runs four flows concurrently:
//! - terminal input → remote stdin (spawned task; the socket keeps being
//!   read while remote stdin is full, so resizes and disconnects still flow)
//! - terminal resize queue → remote size feed (spawned task)
//! - remote stdout/stderr → terminal output
//! - remote completion
//!
//! The client going away cancels the remote stream; the remote process
//! ending closes the terminal.

use crate::config::ExecConfig;
use crate::exec::{ExecError, ExecOutcome, ExecRequest, ExecStream, ExecTransport, ResizeSink};
use crate::session::{SessionLifecycle, SessionOutcome, SessionState};
use crate::terminal::TerminalIo;
use futures::SinkExt;
use podterm_contract::Authorization;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How long remote output may keep flowing after the process has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const OUTPUT_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Open(ExecError),

    #[error(transparent)]
    Stream(ExecError),
}

/// How a bridged session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote process exited
    Exited { code: Option<i32> },
    /// The browser disconnected and the remote stream was cancelled
    ClientDisconnected,
}

/// Opens exec streams for authorized sessions and pumps them
#[derive(Clone)]
pub struct ExecBridge {
    transport: Arc<dyn ExecTransport>,
    exec: ExecConfig,
}

impl ExecBridge {
    pub fn new(transport: Arc<dyn ExecTransport>, exec: ExecConfig) -> Self {
        Self { transport, exec }
    }

    /// Run an interactive shell in the authorized pod until either side ends.
    ///
    /// On failure a diagnostic line is written to the terminal before it is
    /// closed. The terminal is closed on every path.
    pub async fn run(
        &self,
        authorization: &Authorization,
        terminal: Arc<dyn TerminalIo>,
        lifecycle: &SessionLifecycle,
    ) -> Result<SessionEnd, BridgeError> {
        let request = ExecRequest::interactive_shell(authorization, &self.exec);

        let stream = match self.transport.open(request).await {
            Ok(stream) => stream,
            Err(err) => {
                let err = BridgeError::Open(err);
                return Err(fail(authorization, terminal.as_ref(), lifecycle, err).await);
            }
        };
        lifecycle.advance(SessionState::Streaming);
        debug!(target_pod = %authorization, "exec stream established");

        match pump(stream, Arc::clone(&terminal)).await {
            Ok(end) => {
                terminal.close().await;
                lifecycle.advance(SessionState::Closed(SessionOutcome::Ok));
                info!(?end, "terminal session finished");
                Ok(end)
            }
            Err(err) => {
                let err = BridgeError::Stream(err);
                Err(fail(authorization, terminal.as_ref(), lifecycle, err).await)
            }
        }
    }
}

/// Tell the user what went wrong, then close. Errors while doing so are
/// swallowed so they do not mask `err`.
async fn fail(
    authorization: &Authorization,
    terminal: &dyn TerminalIo,
    lifecycle: &SessionLifecycle,
    err: BridgeError,
) -> BridgeError {
    warn!(target_pod = %authorization, error = %err, "exec into pod failed");
    let _ = terminal.write(diagnostic(authorization, &err).as_bytes()).await;
    terminal.close().await;
    lifecycle.advance(SessionState::Closed(SessionOutcome::Error));
    err
}

fn diagnostic(authorization: &Authorization, err: &BridgeError) -> String {
    format!("\r\nexec into pod {} failed: {}\r\n", authorization, err)
}

async fn pump(
    stream: ExecStream,
    terminal: Arc<dyn TerminalIo>,
) -> Result<SessionEnd, ExecError> {
    let ExecStream {
        stdin,
        stdout,
        stderr,
        resize,
        mut completion,
        cancel,
    } = stream;

    let mut input = tokio::spawn(pump_input(Arc::clone(&terminal), stdin, cancel.clone()));
    let resizer = tokio::spawn(pump_resize(Arc::clone(&terminal), resize));

    let output = async {
        match stderr {
            Some(stderr) => {
                tokio::join!(
                    pump_output(stdout, terminal.as_ref()),
                    pump_output(stderr, terminal.as_ref())
                );
            }
            None => pump_output(stdout, terminal.as_ref()).await,
        }
    };
    tokio::pin!(output);

    let mut output_done = false;
    let mut input_done = false;
    let mut client_gone = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut completion => break outcome,
            _ = &mut output, if !output_done => output_done = true,
            _ = &mut input, if !input_done => {
                input_done = true;
                client_gone = true;
                cancel.cancel();
            }
        }
    };

    if !output_done && tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut output).await.is_err() {
        debug!("remote output still open after exit, dropping it");
    }
    input.abort();
    resizer.abort();

    match outcome {
        _ if client_gone => Ok(SessionEnd::ClientDisconnected),
        Ok(ExecOutcome::Exited { code }) => Ok(SessionEnd::Exited { code }),
        Ok(ExecOutcome::Cancelled) => Ok(SessionEnd::ClientDisconnected),
        Err(err) => Err(err),
    }
}

/// Relay terminal input to remote stdin until the client goes away.
///
/// Reading the terminal and writing remote stdin run side by side, joined by
/// an unbounded queue. Once remote stdin is closed further input is dropped
/// but the terminal is still read.
async fn pump_input(
    terminal: Arc<dyn TerminalIo>,
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    cancel: CancellationToken,
) {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let reader = read_input(terminal.as_ref(), input_tx, &cancel);
    tokio::pin!(reader);

    tokio::select! {
        () = &mut reader => {}
        () = write_stdin(stdin, input_rx) => reader.await,
    }
}

/// Cancels the remote stream itself when the client goes away, before
/// remote stdin is dropped.
async fn read_input(
    terminal: &dyn TerminalIo,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    cancel: &CancellationToken,
) {
    loop {
        match terminal.read().await {
            Ok(data) => {
                if input_tx.send(data).is_err() {
                    trace!("remote stdin closed, dropping input");
                }
            }
            Err(err) => {
                debug!(%err, "terminal input ended");
                cancel.cancel();
                return;
            }
        }
    }
}

async fn write_stdin(
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(data) = input_rx.recv().await {
        let written = async {
            stdin.write_all(&data).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            debug!(%err, "remote stdin closed");
            return;
        }
    }
}

async fn pump_output(mut reader: Box<dyn AsyncRead + Send + Unpin>, terminal: &dyn TerminalIo) {
    let mut buf = vec![0u8; OUTPUT_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = terminal.write(&buf[..n]).await {
                    debug!(%err, "terminal output closed");
                    break;
                }
            }
            Err(err) => {
                debug!(%err, "remote output failed");
                break;
            }
        }
    }
}

async fn pump_resize(terminal: Arc<dyn TerminalIo>, mut resize: ResizeSink) {
    while let Some(size) = terminal.next_resize().await {
        debug!(%size, "terminal resized");
        if let Err(err) = resize.send(size).await {
            debug!(%err, "remote size feed closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_dependencies::{RecordingExecTransport, RemoteBehavior};
    use crate::terminal::tests::channel_terminal;
    use axum::extract::ws::Message;
    use futures::StreamExt;
    use podterm_contract::TerminalSize;
    use tracing_test::traced_test;

    fn authorization(namespace: &str, pod: &str) -> Authorization {
        Authorization {
            namespace: namespace.into(),
            workload_name: pod.into(),
            user_id: 1,
        }
    }

    fn bridge(transport: &Arc<RecordingExecTransport>) -> ExecBridge {
        ExecBridge::new(transport.clone(), ExecConfig::default())
    }

    fn streaming_lifecycle() -> SessionLifecycle {
        let lifecycle = SessionLifecycle::new();
        lifecycle.advance(SessionState::Authorized);
        lifecycle
    }

    #[tokio::test]
    async fn immediate_exit_closes_without_diagnostic() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::Exit {
            output: Vec::new(),
            code: 0,
        }));
        let (terminal, mut client) = channel_terminal();
        let lifecycle = streaming_lifecycle();

        let end = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal.clone(), &lifecycle)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Exited { code: Some(0) });
        assert!(terminal.is_closed());
        let (output, saw_close) = client.drain_output();
        assert!(output.is_empty(), "no diagnostic expected");
        assert!(saw_close);
        assert_eq!(lifecycle.state(), SessionState::Closed(SessionOutcome::Ok));
    }

    #[tokio::test]
    async fn remote_output_is_relayed_before_close() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::Exit {
            output: b"motd\r\n$ ".to_vec(),
            code: 3,
        }));
        let (terminal, mut client) = channel_terminal();
        let lifecycle = streaming_lifecycle();

        let end = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal, &lifecycle)
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Exited { code: Some(3) });
        assert_eq!(client.drain_output().0, b"motd\r\n$ ".to_vec());
    }

    #[tokio::test]
    async fn stream_opens_with_authorized_target() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::Exit {
            output: Vec::new(),
            code: 0,
        }));
        let (terminal, _client) = channel_terminal();

        bridge(&transport)
            .run(&authorization("team-a", "web-7f9c"), terminal, &streaming_lifecycle())
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].namespace, "team-a");
        assert_eq!(requests[0].pod, "web-7f9c");
        assert_eq!(requests[0].command, vec!["bash".to_string()]);
        assert!(requests[0].tty && requests[0].stdin && requests[0].stdout && requests[0].stderr);
    }

    #[tokio::test]
    #[traced_test]
    async fn open_failure_writes_diagnostic_then_closes() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::RejectOpen(
            "pods \"podA\" not found".into(),
        )));
        let (terminal, mut client) = channel_terminal();
        let lifecycle = streaming_lifecycle();

        let err = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal.clone(), &lifecycle)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Open(ExecError::Open(_))));
        assert!(terminal.is_closed());
        let (output, saw_close) = client.drain_output();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("exec into pod ns1/podA failed"), "got {text:?}");
        assert!(text.contains("not found"));
        assert!(saw_close);
        assert_eq!(lifecycle.state(), SessionState::Closed(SessionOutcome::Error));
        assert!(logs_contain("exec into pod failed"));
    }

    #[tokio::test]
    async fn stream_failure_writes_diagnostic() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::FailStream(
            "connection reset by apiserver".into(),
        )));
        let (terminal, mut client) = channel_terminal();
        let lifecycle = streaming_lifecycle();

        let err = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal, &lifecycle)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Stream(_)));
        let text = String::from_utf8(client.drain_output().0).unwrap();
        assert!(text.contains("connection reset by apiserver"));
        assert_eq!(lifecycle.state(), SessionState::Closed(SessionOutcome::Error));
    }

    #[tokio::test]
    async fn input_is_echoed_and_resizes_reach_remote_in_order() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::Echo));
        let (terminal, mut client) = channel_terminal();
        let lifecycle = Arc::new(streaming_lifecycle());

        let session = {
            let bridge = bridge(&transport);
            let terminal = terminal.clone();
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                bridge.run(&authorization("ns1", "podA"), terminal, &lifecycle).await
            })
        };

        client.resize(80, 24);
        client.resize(100, 30);
        client.resize(120, 40);
        client.send_binary(b"echo hi\r");

        let echoed = client.from_server.next().await.unwrap();
        assert_eq!(echoed, Message::Binary(b"echo hi\r".to_vec()));

        transport.wait_for_resizes(0, 3).await;
        assert_eq!(
            transport.resizes(0),
            vec![
                TerminalSize::new(80, 24),
                TerminalSize::new(100, 30),
                TerminalSize::new(120, 40)
            ]
        );

        client.to_server.unbounded_send(Message::Close(None)).unwrap();
        let end = session.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::ClientDisconnected);
        assert!(transport.was_cancelled(0), "remote must be cancelled");
        assert_eq!(transport.stdin(0), b"echo hi\r".to_vec());
        assert_eq!(lifecycle.state(), SessionState::Closed(SessionOutcome::Ok));
    }

    fn spawn_session(
        transport: &Arc<RecordingExecTransport>,
        terminal: Arc<dyn TerminalIo>,
    ) -> tokio::task::JoinHandle<Result<SessionEnd, BridgeError>> {
        let bridge = bridge(transport);
        tokio::spawn(async move {
            bridge.run(&authorization("ns1", "podA"), terminal, &streaming_lifecycle()).await
        })
    }

    #[tokio::test]
    async fn blocked_stdin_does_not_stall_resize_or_disconnect() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::IgnoreInput));
        let (terminal, client) = channel_terminal();
        let session = spawn_session(&transport, terminal);

        // Twice the pipe capacity, so the stdin writer blocks.
        client.send_binary(&vec![b'x'; 128 * 1024]);
        client.resize(120, 40);

        transport.wait_for_resizes(0, 1).await;
        assert_eq!(transport.resizes(0), vec![TerminalSize::new(120, 40)]);

        client.to_server.unbounded_send(Message::Close(None)).unwrap();
        let end = tokio::time::timeout(Duration::from_secs(3), session)
            .await
            .expect("session must end after close")
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::ClientDisconnected);
        assert!(transport.was_cancelled(0), "remote must be cancelled");
    }

    #[tokio::test]
    async fn stdout_and_stderr_both_reach_terminal() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::SplitOutput {
            stdout: b"abc".to_vec(),
            stderr: b"XYZ".to_vec(),
            code: 0,
        }));
        let (terminal, mut client) = channel_terminal();

        let end = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal, &streaming_lifecycle())
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::Exited { code: Some(0) });
        let (output, saw_close) = client.drain_output();
        assert_eq!(output.len(), 6);
        let from_stdout: Vec<u8> =
            output.iter().copied().filter(u8::is_ascii_lowercase).collect();
        let from_stderr: Vec<u8> =
            output.iter().copied().filter(u8::is_ascii_uppercase).collect();
        assert_eq!(from_stdout, b"abc".to_vec());
        assert_eq!(from_stderr, b"XYZ".to_vec());
        assert!(saw_close);
    }

    #[tokio::test]
    async fn closed_remote_stdin_keeps_session_running() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::ClosedStdin));
        let (terminal, client) = channel_terminal();
        let session = spawn_session(&transport, terminal);

        client.send_binary(b"ls\r");
        client.send_binary(b"pwd\r");
        client.resize(90, 20);

        transport.wait_for_resizes(0, 1).await;
        assert_eq!(transport.resizes(0), vec![TerminalSize::new(90, 20)]);
        assert!(!session.is_finished(), "session must outlive remote stdin");

        client.to_server.unbounded_send(Message::Close(None)).unwrap();
        let end = tokio::time::timeout(Duration::from_secs(3), session)
            .await
            .expect("session must end after close")
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::ClientDisconnected);
        assert!(transport.was_cancelled(0));
        assert!(transport.stdin(0).is_empty());
    }

    #[tokio::test]
    async fn client_drop_cancels_remote() {
        let transport = Arc::new(RecordingExecTransport::new(RemoteBehavior::Echo));
        let (terminal, client) = channel_terminal();
        drop(client);

        let end = bridge(&transport)
            .run(&authorization("ns1", "podA"), terminal.clone(), &streaming_lifecycle())
            .await
            .unwrap();

        assert_eq!(end, SessionEnd::ClientDisconnected);
        assert!(transport.was_cancelled(0));
        assert!(terminal.is_closed());
    }
}
