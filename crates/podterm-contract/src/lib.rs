// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! podterm wire contract types and validation
//!
//! This crate defines the records exchanged with the external ticket service,
//! the control frames a browser terminal sends over the WebSocket, and the
//! Problem+JSON error body returned by the HTTP surface. The types are shared
//! between the server, its test doubles and any client tooling.
//!
//! ## WebSocket framing
//!
//! * client → server **binary** frames carry raw terminal input;
//! * client → server **text** frames carry a JSON [`ClientFrame`] tagged by
//!   `operation` (`stdin` or `resize`);
//! * server → client frames are always **binary** terminal output.

pub mod error;
pub mod types;
pub mod validation;

pub use error::*;
pub use types::*;
