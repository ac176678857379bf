//! Relay Config
//!
//! This crate contains the serializable configuration types for relay.
//! These types describe how to reach an API and which chained calls to make
//! before they are turned into runtime operations by `relay-request`.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=client.json`)
//! - Any other serde source, since every type is plain data
//!
//! Chain definitions reference earlier steps' decoded results through
//! [`ResultRef`]s, which become deferred inputs at execution time.

mod chain;
mod client;
mod error;

pub use chain::{ChainDef, Encoding, ResultRef, StepDef};
pub use client::ClientConfig;
pub use error::ConfigError;
