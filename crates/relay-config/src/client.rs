//! API client configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How to reach an API and what every request to it carries.
///
/// ```json
/// {
///   "base_url": "https://api.example.com",
///   "headers": { "Accept": "application/json" },
///   "parameters": { "locale": "en" },
///   "timeout_ms": 30000,
///   "max_concurrent_operations": 4
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
  pub base_url: String,
  /// Headers added to every operation built from this config.
  #[serde(default)]
  pub headers: HashMap<String, String>,
  /// Parameters added to every operation built from this config.
  #[serde(default)]
  pub parameters: serde_json::Map<String, serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Upper bound on operations executing at once across all chains.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_concurrent_operations: Option<usize>,
}

impl ClientConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      headers: HashMap::new(),
      parameters: serde_json::Map::new(),
      timeout_ms: None,
      max_concurrent_operations: None,
    }
  }

  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_for_missing_fields() {
    let config = ClientConfig::from_json(r#"{"base_url": "http://localhost:8080"}"#).unwrap();

    assert_eq!(config, ClientConfig::new("http://localhost:8080"));
  }

  #[test]
  fn test_full_config() {
    let config = ClientConfig::from_json(
      r#"{
        "base_url": "https://api.example.com",
        "headers": {"Accept": "application/json"},
        "parameters": {"locale": "en"},
        "timeout_ms": 500,
        "max_concurrent_operations": 2
      }"#,
    )
    .unwrap();

    assert_eq!(config.headers["Accept"], "application/json");
    assert_eq!(config.parameters["locale"], "en");
    assert_eq!(config.timeout_ms, Some(500));
    assert_eq!(config.max_concurrent_operations, Some(2));
  }

  #[test]
  fn test_missing_base_url_is_rejected() {
    let result = ClientConfig::from_json(r#"{"headers": {}}"#);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
  }
}
