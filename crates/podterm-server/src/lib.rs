// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! podterm terminal server
//!
//! Accepts browser terminal connections over WebSocket, exchanges the
//! one-time ticket on each connection for a pod authorization, and relays
//! the terminal to an interactive shell inside that pod.

pub mod bridge;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod exec;
pub mod handlers;
pub mod mock_dependencies;
pub mod server;
pub mod session;
pub mod state;
pub mod terminal;
pub mod ticket;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::Server;
