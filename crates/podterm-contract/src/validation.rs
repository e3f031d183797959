// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Validation helpers for contract types

use crate::error::ContractError;
use crate::types::*;
use validator::Validate;

/// Turn a ticket record into the authorization it grants.
///
/// Fails when the record does not name both a namespace and a pod.
pub fn authorize_ticket(record: TicketRecord) -> Result<Authorization, ContractError> {
    if let Err(errors) = record.validate() {
        let mut fields: Vec<String> =
            errors.field_errors().keys().map(|field| field.to_string()).collect();
        fields.sort();
        return Err(ContractError::MissingTarget(format!(
            "missing {}",
            fields.join(", ")
        )));
    }

    Ok(Authorization {
        namespace: record.namespace_name,
        workload_name: record.pod_name,
        user_id: record.user_id,
    })
}

/// Validate a resize request coming from the browser
pub fn validate_terminal_size(size: TerminalSize) -> Result<TerminalSize, ContractError> {
    if size.is_empty() {
        return Err(ContractError::InvalidTerminalSize {
            cols: size.cols,
            rows: size.rows,
        });
    }
    Ok(size)
}
