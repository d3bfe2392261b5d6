//! Subcommand implementations.

pub(crate) mod config;
pub(crate) mod payloads;
pub(crate) mod run;

use anyhow::{Result, bail};
use dezero_kernel::Response;
use serde_json::Value;

/// Unwrap a successful response body, or turn the failure into an error.
pub(crate) fn into_body(response: Response) -> Result<Value> {
    if response.is_ok() {
        return Ok(response.body);
    }
    let message = response
        .body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("command failed")
        .to_string();
    bail!(
        "{message} ({}, code 0x{:02x})",
        serde_json::to_value(response.status)?
            .as_str()
            .unwrap_or("error"),
        response.code.as_u8()
    )
}
