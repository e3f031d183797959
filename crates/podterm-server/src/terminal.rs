// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Browser terminal connection presented as three logical channels.
//!
//! A [`WsTerminal`] owns one WebSocket for the lifetime of a session and
//! splits it into terminal input ([`TerminalIo::read`]), terminal output
//! ([`TerminalIo::write`]) and a FIFO of resize events
//! ([`TerminalIo::next_resize`]). Resize control frames are consumed by the
//! reader and never surface as input bytes. Framing is documented in
//! `podterm_contract`.

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use podterm_contract::{validation::validate_terminal_size, ClientFrame, TerminalSize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex as StdMutex,
};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How long `close` waits for the close frame to be flushed to the peer
const CLOSE_FRAME_GRACE: Duration = Duration::from_secs(1);

pub type TerminalResult<T> = Result<T, TerminalError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminalError {
    /// `close` has been called on this terminal
    #[error("terminal closed")]
    Closed,

    /// The browser went away (close frame or end of stream)
    #[error("client disconnected")]
    Disconnected,

    #[error("websocket transport error: {0}")]
    Transport(String),
}

/// Input, output and resize capabilities of a client terminal.
///
/// One task may call `read` and one task may call `next_resize` at a time;
/// `write` and `close` may be called from anywhere.
#[async_trait]
pub trait TerminalIo: Send + Sync {
    /// Next chunk of terminal input
    async fn read(&self) -> TerminalResult<Vec<u8>>;

    /// Send terminal output to the client
    async fn write(&self, data: &[u8]) -> TerminalResult<()>;

    /// Next resize event in arrival order, `None` once closed
    async fn next_resize(&self) -> Option<TerminalSize>;

    /// Close the connection. Idempotent; wakes every pending call.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// [`TerminalIo`] over the two halves of a WebSocket
pub struct WsTerminal<Tx, Rx> {
    sink: Mutex<Tx>,
    stream: Mutex<Rx>,
    resize_tx: mpsc::UnboundedSender<TerminalSize>,
    resize_rx: Mutex<mpsc::UnboundedReceiver<TerminalSize>>,
    last_resize: StdMutex<Option<TerminalSize>>,
    closing: AtomicBool,
    closed: CancellationToken,
}

/// What a single inbound frame turned out to be
enum Inbound {
    Data(Vec<u8>),
    Resize(TerminalSize),
    Close,
    Skip,
}

impl<Tx, Rx> WsTerminal<Tx, Rx>
where
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: std::fmt::Display,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    pub fn new(sink: Tx, stream: Rx) -> Self {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            resize_tx,
            resize_rx: Mutex::new(resize_rx),
            last_resize: StdMutex::new(None),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    fn classify(message: Message) -> Inbound {
        match message {
            Message::Binary(bytes) => Inbound::Data(bytes),
            Message::Text(text) => match ClientFrame::from_text(&text) {
                Ok(ClientFrame::Stdin { data }) => Inbound::Data(data.into_bytes()),
                Ok(ClientFrame::Resize { cols, rows }) => {
                    match validate_terminal_size(TerminalSize::new(cols, rows)) {
                        Ok(size) => Inbound::Resize(size),
                        Err(err) => {
                            debug!(%err, "dropping resize frame");
                            Inbound::Skip
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "ignoring malformed control frame");
                    Inbound::Skip
                }
            },
            Message::Close(_) => Inbound::Close,
            Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
        }
    }

    /// Queue a resize, coalescing it with an identical predecessor
    fn push_resize(&self, size: TerminalSize) {
        let mut last = self.last_resize.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == Some(size) {
            trace!(%size, "coalescing duplicate resize");
            return;
        }
        *last = Some(size);
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.resize_tx.send(size);
    }
}

#[async_trait]
impl<Tx, Rx> TerminalIo for WsTerminal<Tx, Rx>
where
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: std::fmt::Display,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    async fn read(&self) -> TerminalResult<Vec<u8>> {
        let mut stream = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TerminalError::Closed),
            guard = self.stream.lock() => guard,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(TerminalError::Closed),
                next = stream.next() => next,
            };

            match next {
                None => return Err(TerminalError::Disconnected),
                Some(Err(err)) => return Err(TerminalError::Transport(err.to_string())),
                Some(Ok(message)) => match Self::classify(message) {
                    Inbound::Data(bytes) if bytes.is_empty() => continue,
                    Inbound::Data(bytes) => return Ok(bytes),
                    Inbound::Resize(size) => self.push_resize(size),
                    Inbound::Close => return Err(TerminalError::Disconnected),
                    Inbound::Skip => continue,
                },
            }
        }
    }

    async fn write(&self, data: &[u8]) -> TerminalResult<()> {
        if self.closed.is_cancelled() {
            return Err(TerminalError::Closed);
        }

        let mut sink = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(TerminalError::Closed),
            guard = self.sink.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TerminalError::Closed),
            sent = sink.send(Message::Binary(data.to_vec())) => {
                sent.map_err(|err| TerminalError::Transport(err.to_string()))
            }
        }
    }

    async fn next_resize(&self) -> Option<TerminalSize> {
        let mut queue = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return None,
            guard = self.resize_rx.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            size = queue.recv() => size,
        }
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        // Writers observe the cancellation and release the sink.
        let mut sink = self.sink.lock().await;
        let flushed = tokio::time::timeout(CLOSE_FRAME_GRACE, async {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        })
        .await;
        if flushed.is_err() {
            debug!("peer did not accept close frame in time");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
