//! DeZero Telemetry - logging setup for the payload runtime.
//!
//! Installs a `tracing` subscriber with an env filter, one of four output
//! formats, and a stdout, stderr or rolling-file target.
//!
//! # Example
//!
//! ```rust,no_run
//! use dezero_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), dezero_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Json)
//!     .with_directive("dezero_payload=trace");
//!
//! let _guard = setup_logging(&config)?;
//! tracing::info!(payload_id = "blink", "Payload started");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogGuard, LogTarget, setup_default_logging,
    setup_logging,
};
