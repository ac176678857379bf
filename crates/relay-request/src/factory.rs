//! Builders pre-filled with per-API defaults.

use std::sync::Arc;

use relay_config::ClientConfig;
use relay_transport::{CustomCall, Headers, HttpMethod, Parameters, Transport};
use serde_json::Value;

use crate::builder::RequestBuilder;

/// Hands out request builders bound to one transport, carrying parameters
/// and headers every call to that API needs. Values set on the builder
/// override the predefined ones.
#[derive(Clone)]
pub struct CallsFactory {
  transport: Arc<dyn Transport>,
  parameters: Parameters,
  headers: Headers,
}

impl CallsFactory {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      parameters: Parameters::new(),
      headers: Headers::new(),
    }
  }

  /// Use the config's headers and parameters as predefined values.
  pub fn from_config(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
    Self {
      transport,
      parameters: config.parameters.clone(),
      headers: config.headers.clone(),
    }
  }

  pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.parameters.insert(key.into(), value.into());
    self
  }

  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn operation(&self, method: HttpMethod, path: impl Into<String>) -> RequestBuilder {
    self
      .predefined()
      .call(self.transport.clone(), method, path)
  }

  /// A builder for a custom call that still carries the predefined inputs.
  pub fn custom_operation(&self, call: CustomCall) -> RequestBuilder {
    self.predefined().custom(call)
  }

  fn predefined(&self) -> RequestBuilder {
    RequestBuilder::new()
      .parameters(self.parameters.clone())
      .headers(self.headers.clone())
  }
}
