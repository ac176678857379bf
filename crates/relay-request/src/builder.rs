//! Fluent construction of request operations.

use std::sync::Arc;

use relay_transport::{
  CustomCall, Headers, HttpMethod, ParamEncoding, Parameters, Transport, TransportError,
};
use serde_json::Value;

use crate::deferred::Deferred;
use crate::error::RequestError;
use crate::operation::{
  CompletionHandler, DataHandler, ErrorHandler, Execution, Operation, OperationKind,
  PersistenceContext, RequestSpec,
};
use crate::serializer::{JsonSerializer, ResponseSerializer, erase};
use crate::store::ResultValue;

/// Builder for a request operation decoded by `S`.
///
/// Exactly one of [`call`](Self::call) and [`custom`](Self::custom) must be
/// set before [`build`](Self::build).
pub struct RequestBuilder<S: ResponseSerializer = JsonSerializer> {
  transport_call: Option<(Arc<dyn Transport>, HttpMethod, String)>,
  custom: Option<CustomCall>,
  encoding: ParamEncoding,
  parameters: Parameters,
  headers: Headers,
  deferred_parameters: Vec<(String, Deferred<Value>)>,
  deferred_headers: Vec<(String, Deferred<String>)>,
  serializer: S,
  data_handler: Option<DataHandler>,
  completion: Option<CompletionHandler>,
  on_error: Option<ErrorHandler>,
  context: Option<PersistenceContext>,
  label: Option<String>,
}

impl RequestBuilder<JsonSerializer> {
  pub fn new() -> Self {
    Self {
      transport_call: None,
      custom: None,
      encoding: ParamEncoding::default(),
      parameters: Parameters::new(),
      headers: Headers::new(),
      deferred_parameters: Vec::new(),
      deferred_headers: Vec::new(),
      serializer: JsonSerializer,
      data_handler: None,
      completion: None,
      on_error: None,
      context: None,
      label: None,
    }
  }
}

impl Default for RequestBuilder<JsonSerializer> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: ResponseSerializer> RequestBuilder<S> {
  /// Perform the call through `transport`.
  pub fn call(
    mut self,
    transport: Arc<dyn Transport>,
    method: HttpMethod,
    path: impl Into<String>,
  ) -> Self {
    self.transport_call = Some((transport, method, path.into()));
    self
  }

  /// Perform the call with a custom closure instead of a transport.
  pub fn custom(mut self, call: CustomCall) -> Self {
    self.custom = Some(call);
    self
  }

  pub fn encoding(mut self, encoding: ParamEncoding) -> Self {
    self.encoding = encoding;
    self
  }

  pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.parameters.insert(key.into(), value.into());
    self
  }

  /// Merge `parameters` over those already set.
  pub fn parameters(mut self, parameters: Parameters) -> Self {
    self.parameters.extend(parameters);
    self
  }

  pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }

  pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
    self.headers.extend(headers);
    self
  }

  /// A parameter resolved when the operation starts. It overrides a static
  /// parameter of the same key; an absent value removes the key.
  pub fn deferred_parameter<T>(mut self, key: impl Into<String>, value: Deferred<T>) -> Self
  where
    T: Into<Value> + 'static,
  {
    self
      .deferred_parameters
      .push((key.into(), value.map(Into::into)));
    self
  }

  /// A header resolved when the operation starts. Same rules as
  /// [`deferred_parameter`](Self::deferred_parameter).
  pub fn deferred_header(mut self, key: impl Into<String>, value: Deferred<String>) -> Self {
    self.deferred_headers.push((key.into(), value));
    self
  }

  /// Decode responses with `serializer`.
  ///
  /// Handlers are typed by the serializer's output, so handlers registered
  /// before this call are discarded.
  pub fn serializer<T: ResponseSerializer>(self, serializer: T) -> RequestBuilder<T> {
    RequestBuilder {
      transport_call: self.transport_call,
      custom: self.custom,
      encoding: self.encoding,
      parameters: self.parameters,
      headers: self.headers,
      deferred_parameters: self.deferred_parameters,
      deferred_headers: self.deferred_headers,
      serializer,
      data_handler: None,
      completion: None,
      on_error: self.on_error,
      context: self.context,
      label: self.label,
    }
  }

  /// Handle the decoded value or the error, together with the operation's
  /// persistence context.
  pub fn on_response<F>(mut self, handler: F) -> Self
  where
    F: Fn(Option<&S::Output>, Option<&TransportError>, Option<&PersistenceContext>)
      + Send
      + Sync
      + 'static,
  {
    self.data_handler = Some(Arc::new(
      move |value: Option<&ResultValue>,
            error: Option<&TransportError>,
            context: Option<&PersistenceContext>| {
        handler(downcast::<S>(value), error, context)
      },
    ));
    self
  }

  /// Handle completion directly. When set, the response handler is not called.
  pub fn on_complete<F>(mut self, handler: F) -> Self
  where
    F: Fn(Option<&S::Output>, Option<&TransportError>) + Send + Sync + 'static,
  {
    self.completion = Some(Arc::new(
      move |value: Option<&ResultValue>, error: Option<&TransportError>| {
        handler(downcast::<S>(value), error)
      },
    ));
    self
  }

  /// Called after the response or completion handler when the call failed.
  pub fn on_error<F>(mut self, handler: F) -> Self
  where
    F: Fn(&TransportError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(handler));
    self
  }

  pub fn context(mut self, context: PersistenceContext) -> Self {
    self.context = Some(context);
    self
  }

  pub fn label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  pub fn build(self) -> Result<Operation, RequestError> {
    let execution = match (self.transport_call, self.custom) {
      (Some((transport, method, path)), None) => Execution::Transport {
        transport,
        method,
        path,
        encoding: self.encoding,
      },
      (None, Some(call)) => Execution::Custom(call),
      (Some(_), Some(_)) => {
        return Err(RequestError::invalid_configuration(
          "operation has both a transport call and a custom call",
        ));
      }
      (None, None) => {
        return Err(RequestError::invalid_configuration(
          "operation needs a transport call or a custom call",
        ));
      }
    };

    let spec = RequestSpec {
      execution,
      parameters: self.parameters,
      headers: self.headers,
      deferred_parameters: self.deferred_parameters,
      deferred_headers: self.deferred_headers,
      decode: erase(self.serializer),
      data_handler: self.data_handler,
      completion: self.completion,
      on_error: self.on_error,
    };

    let operation = Operation::from_kind(OperationKind::Request(Arc::new(spec)), self.label, 0);
    operation.set_context(self.context);
    Ok(operation)
  }
}

fn downcast<S: ResponseSerializer>(value: Option<&ResultValue>) -> Option<&S::Output> {
  value.and_then(|value| (**value).downcast_ref::<S::Output>())
}
