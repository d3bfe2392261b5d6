//! DeZero Test - shared test utilities for the payload runtime.
//!
//! Mock collaborators, manifest fixtures and a ready-wired [`TestBed`],
//! used by the other crates as a dev-dependency.
//!
//! ```rust,ignore
//! use dezero_test::{TestBed, test_lua_package};
//!
//! #[tokio::test]
//! async fn test_install_and_run() {
//!     let bed = TestBed::new();
//!     let manager = bed.manager();
//!     manager.install("blink", &test_lua_package("blink")).await.unwrap();
//!     manager.execute("blink", &Default::default()).await.unwrap();
//!     assert_eq!(bed.backend.loads(), vec!["blink"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
