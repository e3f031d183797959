// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging configuration types

use crate::{CliLogLevel, LogFormat};
use serde::{Deserialize, Serialize};

/// `[logging]` section of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging verbosity level
    #[serde(rename = "log-level")]
    pub level: Option<CliLogLevel>,

    /// Output format
    #[serde(rename = "log-format")]
    pub format: Option<LogFormat>,

    /// Directory for log files
    #[serde(rename = "log-dir")]
    pub dir: Option<String>,
}
