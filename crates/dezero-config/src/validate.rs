//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Permission names a policy may grant.
pub const KNOWN_PERMISSIONS: &[&str] = &[
    "wifi_scan",
    "wifi_inject",
    "ble_scan",
    "ble_advertise",
    "gpio_read",
    "gpio_write",
    "display_write",
    "storage_read",
    "storage_write",
    "network",
];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_storage(config)?;
    validate_runtime(config)?;
    validate_policy(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_storage(config: &Config) -> ConfigResult<()> {
    let s = &config.storage;

    if s.root.as_os_str().is_empty() {
        return Err(invalid("storage.root", "root must not be empty"));
    }

    let dir = s.payload_dir.as_str();
    if dir.is_empty() || dir.contains(['/', '\\']) || dir == "." || dir == ".." {
        return Err(invalid(
            "storage.payload_dir",
            format!("'{dir}' must be a single directory name"),
        ));
    }

    if s.capacity_kb == 0 {
        return Err(invalid("storage.capacity_kb", "capacity_kb must be positive"));
    }
    Ok(())
}

fn validate_runtime(config: &Config) -> ConfigResult<()> {
    let r = &config.runtime;

    if r.tick_interval_ms == 0 {
        return Err(invalid(
            "runtime.tick_interval_ms",
            "tick_interval_ms must be positive",
        ));
    }
    if r.cpu_time_limit_ms == 0 {
        return Err(invalid(
            "runtime.cpu_time_limit_ms",
            "cpu_time_limit_ms must be positive",
        ));
    }
    if r.tick_interval_ms > r.cpu_time_limit_ms {
        return Err(invalid(
            "runtime.tick_interval_ms",
            format!(
                "tick_interval_ms ({}) must not exceed cpu_time_limit_ms ({})",
                r.tick_interval_ms, r.cpu_time_limit_ms
            ),
        ));
    }
    if r.max_payload_size_kb == 0 {
        return Err(invalid(
            "runtime.max_payload_size_kb",
            "max_payload_size_kb must be positive",
        ));
    }
    if r.max_payloads == 0 {
        return Err(invalid("runtime.max_payloads", "max_payloads must be positive"));
    }
    Ok(())
}

fn validate_policy(config: &Config) -> ConfigResult<()> {
    for name in &config.policy.granted {
        if !KNOWN_PERMISSIONS.contains(&name.as_str()) {
            return Err(invalid(
                "policy.granted",
                format!(
                    "unknown permission '{name}'; expected one of: {}",
                    KNOWN_PERMISSIONS.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }
    Ok(())
}
