//! Relay Transport
//!
//! The transport is the only part of relay that talks to the network. The
//! request orchestration layer calls it through the [`Transport`] trait, one
//! call per operation, and never looks at how the call is carried out.
//!
//! [`HttpTransport`] is the reqwest-backed implementation. Tests and callers
//! with unusual needs can provide their own [`Transport`], or skip the trait
//! entirely with a [`CustomCall`].
//!
//! Cancelling a call means dropping its future: the orchestration layer races
//! every call against its cancellation token and drops the loser.

mod error;
mod http;
mod method;
mod transport;

pub use error::TransportError;
pub use http::HttpTransport;
pub use method::{HttpMethod, ParamEncoding};
pub use transport::{
  CustomCall, Headers, Parameters, ProgressFn, Transport, TransportRequest, TransportResult,
  custom_call,
};
