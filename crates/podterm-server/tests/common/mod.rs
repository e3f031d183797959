// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use podterm_contract::Authorization;
use podterm_server::{
    mock_dependencies::{
        MockServerDependencies, RecordingExecTransport, RemoteBehavior, StaticTicketVerifier,
    },
    Server, ServerConfig,
};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub transport: Arc<RecordingExecTransport>,
    pub verifier: Arc<StaticTicketVerifier>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn ws_url(&self, ticket_value: Option<&str>) -> String {
        match ticket_value {
            Some(ticket) => format!("ws://{}/ws?ticket_value={}", self.addr, ticket),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn authorization(namespace: &str, pod: &str) -> Authorization {
    Authorization {
        namespace: namespace.into(),
        workload_name: pod.into(),
        user_id: 7,
    }
}

/// Pick a free local port
pub fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Spawn a server backed by in-process ticket and exec doubles
pub async fn spawn_server(
    verifier: StaticTicketVerifier,
    behavior: RemoteBehavior,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestServer {
    let addr = free_addr();
    let mut config = ServerConfig {
        bind_addr: addr,
        ..ServerConfig::default()
    };
    configure(&mut config);

    let verifier = Arc::new(verifier);
    let transport = Arc::new(RecordingExecTransport::new(behavior));
    let deps = MockServerDependencies::new(config.clone(), verifier.clone(), transport.clone());
    let server = Server::with_state(config, deps.into_state()).await.expect("server");
    let handle = tokio::spawn(async move {
        server.run().await.expect("server run");
    });

    wait_for_listener(addr).await;
    TestServer {
        addr,
        transport,
        verifier,
        handle,
    }
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start listening on {addr}");
}
