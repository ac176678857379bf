//! reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use relay_config::ClientConfig;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportError;
use crate::method::ParamEncoding;
use crate::transport::{ProgressFn, Transport, TransportRequest, TransportResult};

/// Sends calls to `base_url + path` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self::with_client(Client::new(), base_url)
  }

  pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
    Self {
      client,
      base_url: base_url.into(),
    }
  }

  /// Build a transport honoring the config's base URL and timeout.
  pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
    let mut builder = Client::builder();
    if let Some(ms) = config.timeout_ms {
      builder = builder.timeout(Duration::from_millis(ms));
    }
    let client = builder
      .build()
      .map_err(|e| TransportError::general(0, format!("failed to build HTTP client: {}", e)))?;

    Ok(Self::with_client(client, config.base_url.clone()))
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> Result<Url, TransportError> {
    let joined = format!("{}{}", self.base_url.trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|_| TransportError::general(0, "invalid URL"))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  #[instrument(
    name = "http_call",
    skip(self, request, progress),
    fields(method = %request.method, path = %request.path)
  )]
  async fn call(&self, request: TransportRequest, progress: Option<ProgressFn>) -> TransportResult {
    let url = self.url(&request.path)?;

    let mut builder = self.client.request(request.method.into(), url);
    for (key, value) in &request.headers {
      builder = builder.header(key, value);
    }
    builder = encode_parameters(builder, &request);

    let response = builder.send().await?;
    let status = response.status().as_u16();
    debug!(status, "http response received");

    let body = read_body(response, progress.as_ref()).await?;
    classify(status, body)
  }
}

fn encode_parameters(builder: RequestBuilder, request: &TransportRequest) -> RequestBuilder {
  if request.parameters.is_empty() {
    return builder;
  }

  match request.encoding {
    ParamEncoding::Json => builder.json(&request.parameters),
    ParamEncoding::Url => {
      let pairs: Vec<(String, String)> = request
        .parameters
        .iter()
        .map(|(key, value)| {
          let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
          };
          (key.clone(), value)
        })
        .collect();

      if request.method.encodes_in_query() {
        builder.query(&pairs)
      } else {
        builder.form(&pairs)
      }
    }
  }
}

/// Stream the body, reporting progress when the length is known.
async fn read_body(
  response: Response,
  progress: Option<&ProgressFn>,
) -> Result<Bytes, TransportError> {
  let total = response.content_length().filter(|len| *len > 0);
  let mut stream = response.bytes_stream();
  let mut body = BytesMut::new();

  while let Some(chunk) = stream.next().await {
    body.extend_from_slice(&chunk?);
    if let (Some(progress), Some(total)) = (progress, total) {
      progress((body.len() as f32 / total as f32).min(1.0));
    }
  }

  if let Some(progress) = progress {
    progress(1.0);
  }

  Ok(body.freeze())
}

fn classify(status: u16, body: Bytes) -> TransportResult {
  match status {
    200..=399 if body.is_empty() => Ok(None),
    200..=399 => Ok(Some(body)),
    400..=599 => {
      let body = if body.is_empty() { None } else { Some(body) };
      Err(TransportError::http_status(status, body))
    }
    _ => Err(TransportError::general(status, "unknown error")),
  }
}
