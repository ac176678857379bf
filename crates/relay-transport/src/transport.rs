//! The transport capability trait and the shapes that cross it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::TransportError;
use crate::method::{HttpMethod, ParamEncoding};

pub type Parameters = serde_json::Map<String, serde_json::Value>;
pub type Headers = HashMap<String, String>;

/// Receives fractional progress in `[0, 1]` while a call is in flight.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

/// Raw response bytes on success (`None` when there is no payload), or the failure.
pub type TransportResult = Result<Option<Bytes>, TransportError>;

/// Everything needed to perform one HTTP-style call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
  pub method: HttpMethod,
  pub path: String,
  pub parameters: Parameters,
  pub headers: Headers,
  pub encoding: ParamEncoding,
}

impl TransportRequest {
  pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      parameters: Parameters::new(),
      headers: Headers::new(),
      encoding: ParamEncoding::default(),
    }
  }
}

/// Performs one named call and resolves exactly once.
///
/// Implementations must be cancel-safe: the caller drops the returned future
/// to abort an in-flight call.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn call(&self, request: TransportRequest, progress: Option<ProgressFn>) -> TransportResult;
}

/// A call pattern that doesn't fit a single method/path/parameters tuple.
///
/// It follows the same contract as [`Transport::call`]: resolve once, report
/// progress through the optional callback, stop when dropped.
pub type CustomCall =
  Arc<dyn Fn(Option<ProgressFn>) -> BoxFuture<'static, TransportResult> + Send + Sync>;

/// Wrap an async closure as a [`CustomCall`].
pub fn custom_call<F, Fut>(f: F) -> CustomCall
where
  F: Fn(Option<ProgressFn>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = TransportResult> + Send + 'static,
{
  Arc::new(move |progress| f(progress).boxed())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_custom_call_reports_progress_and_resolves() {
    let call = custom_call(|progress: Option<ProgressFn>| async move {
      if let Some(progress) = progress {
        progress(0.5);
      }
      Ok(Some(Bytes::from_static(b"done")))
    });

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));

    let result = call(Some(progress)).await.unwrap();
    assert_eq!(result, Some(Bytes::from_static(b"done")));
    assert_eq!(*seen.lock().unwrap(), vec![0.5]);
  }

  #[test]
  fn test_request_defaults() {
    let request = TransportRequest::new(HttpMethod::Get, "/user");
    assert_eq!(request.encoding, ParamEncoding::Json);
    assert!(request.parameters.is_empty());
    assert!(request.headers.is_empty());
  }
}
