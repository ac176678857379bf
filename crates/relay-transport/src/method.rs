use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }

  /// Whether URL-encoded parameters go into the query string for this method.
  pub fn encodes_in_query(&self) -> bool {
    matches!(self, Self::Get | Self::Delete)
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for HttpMethod {
  type Err = TransportError;

  fn from_str(method: &str) -> Result<Self, Self::Err> {
    match method.to_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "PATCH" => Ok(Self::Patch),
      "DELETE" => Ok(Self::Delete),
      _ => Err(TransportError::general(
        0,
        format!("unsupported HTTP method: {}", method),
      )),
    }
  }
}

impl From<HttpMethod> for reqwest::Method {
  fn from(method: HttpMethod) -> Self {
    match method {
      HttpMethod::Get => reqwest::Method::GET,
      HttpMethod::Post => reqwest::Method::POST,
      HttpMethod::Put => reqwest::Method::PUT,
      HttpMethod::Patch => reqwest::Method::PATCH,
      HttpMethod::Delete => reqwest::Method::DELETE,
    }
  }
}

/// How request parameters are put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ParamEncoding {
  /// JSON object in the request body.
  #[default]
  Json,
  /// Query string for GET/DELETE, form body otherwise.
  Url,
}

impl fmt::Display for ParamEncoding {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Json => f.write_str("JSON"),
      Self::Url => f.write_str("URL"),
    }
  }
}

impl From<relay_config::Encoding> for ParamEncoding {
  fn from(encoding: relay_config::Encoding) -> Self {
    match encoding {
      relay_config::Encoding::Json => Self::Json,
      relay_config::Encoding::Url => Self::Url,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_method_case_insensitive() {
    assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
    assert_eq!("Patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
    assert!("TRACE".parse::<HttpMethod>().is_err());
  }

  #[test]
  fn test_encoding_display() {
    assert_eq!(ParamEncoding::Json.to_string(), "JSON");
    assert_eq!(ParamEncoding::Url.to_string(), "URL");
    assert_eq!(ParamEncoding::default(), ParamEncoding::Json);
  }
}
