use bytes::Bytes;
use thiserror::Error;

/// Why a transport call failed.
///
/// Errors are cloned into per-operation callbacks and into the aggregated
/// error list of a chain, so every variant is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
  /// The request never produced an HTTP response.
  #[error("no internet connection")]
  NoConnectivity,

  /// The server answered with a 4xx or 5xx status.
  #[error("http status {code}")]
  HttpStatus { code: u16, body: Option<Bytes> },

  /// Anything else: malformed URLs, unexpected statuses, client failures.
  #[error("request failed ({code}): {message}")]
  General { code: u16, message: String },
}

impl TransportError {
  pub fn http_status(code: u16, body: impl Into<Option<Bytes>>) -> Self {
    Self::HttpStatus {
      code,
      body: body.into(),
    }
  }

  pub fn general(code: u16, message: impl Into<String>) -> Self {
    Self::General {
      code,
      message: message.into(),
    }
  }

  /// The HTTP status code carried by the error, if any.
  pub fn status_code(&self) -> Option<u16> {
    match self {
      Self::NoConnectivity => None,
      Self::HttpStatus { code, .. } | Self::General { code, .. } => Some(*code),
    }
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_connect() || e.is_timeout() {
      return Self::NoConnectivity;
    }
    Self::General {
      code: e.status().map(|s| s.as_u16()).unwrap_or(0),
      message: e.to_string(),
    }
  }
}
