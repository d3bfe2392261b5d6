#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::module_name_repetitions)]

//! DeZero Kernel - the device runtime around the payload manager.
//!
//! The kernel wires configuration, the backing store and the payload manager
//! together, answers commands from the companion channel, journals lifecycle
//! events, and drives the budget sweep on a fixed tick.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dezero_config::Config;
//! use dezero_kernel::Kernel;
//!
//! # async fn boot() -> Result<(), dezero_kernel::KernelError> {
//! let config = Config::load(None)?.config;
//! let kernel = Arc::new(Kernel::boot(&config).await?);
//! let supervisor = kernel.spawn_supervisor();
//! let response = kernel.handle_json(r#"{"cmd":"list"}"#).await;
//! println!("{}", serde_json::to_string(&response).unwrap_or_default());
//! kernel.shutdown();
//! let _ = supervisor.await;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod host;
pub mod journal;
pub mod kernel;
mod router;

pub use command::{CommandRef, Opcode, Request, Response};
pub use error::{KernelError, KernelResult};
pub use host::{ChannelNotifier, LogNotifier, LoopbackBle, LoopbackWifi};
pub use journal::{EventJournal, JOURNAL_CAPACITY, JournalEntry};
pub use kernel::{Kernel, KernelParts};
