//! Error types for building and submitting operations.

use thiserror::Error;

use crate::store::OperationId;

/// Misuse of the request API.
///
/// Transport failures are not represented here: they are recorded on the
/// failing operation and surfaced through callbacks and the chain's error list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
  /// An operation was built with both or neither of a transport call and a custom call.
  #[error("invalid operation configuration: {message}")]
  InvalidConfiguration { message: String },

  /// An operation can only be submitted once; copy the chain to run it again.
  #[error("operation '{operation_id}' was already submitted")]
  AlreadySubmitted { operation_id: OperationId },

  #[error("result for operation '{operation_id}' is already stored")]
  ResultAlreadyStored { operation_id: OperationId },
}

impl RequestError {
  pub fn invalid_configuration(message: impl Into<String>) -> Self {
    Self::InvalidConfiguration {
      message: message.into(),
    }
  }
}
