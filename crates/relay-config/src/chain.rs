//! Chain definitions.
//!
//! A chain file lists steps in execution order. Later steps may pull values
//! out of earlier steps' decoded JSON responses:
//!
//! ```json
//! {
//!   "name": "place-order",
//!   "steps": [
//!     { "step_id": "user", "method": "GET", "path": "/user" },
//!     {
//!       "step_id": "order",
//!       "method": "POST",
//!       "path": "/orders",
//!       "parameters": { "quantity": 2 },
//!       "deferred_parameters": {
//!         "user_id": { "step": "user", "pointer": "/id" }
//!       }
//!     }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// An ordered sequence of steps making up one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDef {
  pub name: String,
  /// Chains sharing a kind can cancel each other when submitted.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  /// HTTP method name, e.g. `"GET"`.
  pub method: String,
  pub path: String,
  #[serde(default)]
  pub encoding: Encoding,
  #[serde(default)]
  pub parameters: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub headers: HashMap<String, String>,
  #[serde(default)]
  pub deferred_parameters: HashMap<String, ResultRef>,
  #[serde(default)]
  pub deferred_headers: HashMap<String, ResultRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
  #[default]
  Json,
  Url,
}

/// Points at a value inside an earlier step's decoded JSON result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
  /// The `step_id` of the step whose result is read.
  pub step: String,
  /// RFC 6901 JSON pointer; `""` selects the whole result.
  #[serde(default)]
  pub pointer: String,
}

impl ChainDef {
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Check step ids are unique, methods are known and every result reference
  /// points backwards.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.steps.is_empty() {
      return Err(ConfigError::EmptyChain {
        chain: self.name.clone(),
      });
    }

    let known: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for step in &self.steps {
      if !METHODS.iter().any(|m| m.eq_ignore_ascii_case(&step.method)) {
        return Err(ConfigError::UnsupportedMethod {
          step_id: step.step_id.clone(),
          method: step.method.clone(),
        });
      }

      let refs = step
        .deferred_parameters
        .values()
        .chain(step.deferred_headers.values());

      for result_ref in refs {
        if !known.contains(result_ref.step.as_str()) {
          return Err(ConfigError::UnknownReference {
            step_id: step.step_id.clone(),
            target: result_ref.step.clone(),
          });
        }
        if !seen.contains(result_ref.step.as_str()) {
          return Err(ConfigError::ForwardReference {
            step_id: step.step_id.clone(),
            target: result_ref.step.clone(),
          });
        }
        if !result_ref.pointer.is_empty() && !result_ref.pointer.starts_with('/') {
          return Err(ConfigError::InvalidPointer {
            step_id: step.step_id.clone(),
            pointer: result_ref.pointer.clone(),
          });
        }
      }

      if !seen.insert(step.step_id.as_str()) {
        return Err(ConfigError::DuplicateStep {
          step_id: step.step_id.clone(),
        });
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ORDER_CHAIN: &str = r#"{
    "name": "place-order",
    "kind": "orders",
    "steps": [
      { "step_id": "user", "method": "GET", "path": "/user" },
      {
        "step_id": "order",
        "method": "POST",
        "path": "/orders",
        "encoding": "url",
        "parameters": { "quantity": 2 },
        "deferred_parameters": { "user_id": { "step": "user", "pointer": "/id" } },
        "deferred_headers": { "X-User": { "step": "user", "pointer": "/name" } }
      }
    ]
  }"#;

  fn step(step_id: &str) -> StepDef {
    StepDef {
      step_id: step_id.to_string(),
      method: "GET".to_string(),
      path: format!("/{}", step_id),
      encoding: Encoding::Json,
      parameters: serde_json::Map::new(),
      headers: HashMap::new(),
      deferred_parameters: HashMap::new(),
      deferred_headers: HashMap::new(),
    }
  }

  fn reference(target: &str, pointer: &str) -> ResultRef {
    ResultRef {
      step: target.to_string(),
      pointer: pointer.to_string(),
    }
  }

  #[test]
  fn test_parse_chain() {
    let chain = ChainDef::from_json(ORDER_CHAIN).unwrap();

    assert_eq!(chain.kind.as_deref(), Some("orders"));
    assert_eq!(chain.steps.len(), 2);
    assert_eq!(chain.steps[0].encoding, Encoding::Json);
    assert_eq!(chain.steps[1].encoding, Encoding::Url);
    assert_eq!(chain.steps[1].deferred_parameters["user_id"], reference("user", "/id"));
    assert!(chain.validate().is_ok());
  }

  #[test]
  fn test_empty_chain_is_invalid() {
    let chain = ChainDef {
      name: "empty".to_string(),
      kind: None,
      steps: vec![],
    };
    assert!(matches!(chain.validate(), Err(ConfigError::EmptyChain { .. })));
  }

  #[test]
  fn test_duplicate_step_ids() {
    let chain = ChainDef {
      name: "dup".to_string(),
      kind: None,
      steps: vec![step("a"), step("a")],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::DuplicateStep { step_id }) if step_id == "a"
    ));
  }

  #[test]
  fn test_unknown_reference() {
    let mut b = step("b");
    b.deferred_parameters
      .insert("x".to_string(), reference("missing", "/x"));
    let chain = ChainDef {
      name: "unknown".to_string(),
      kind: None,
      steps: vec![step("a"), b],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::UnknownReference { target, .. }) if target == "missing"
    ));
  }

  #[test]
  fn test_forward_and_self_references() {
    let mut a = step("a");
    a.deferred_headers.insert("X".to_string(), reference("b", ""));
    let chain = ChainDef {
      name: "forward".to_string(),
      kind: None,
      steps: vec![a, step("b")],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::ForwardReference { .. })
    ));

    let mut own = step("own");
    own.deferred_parameters.insert("x".to_string(), reference("own", ""));
    let chain = ChainDef {
      name: "self".to_string(),
      kind: None,
      steps: vec![own],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::ForwardReference { .. })
    ));
  }

  #[test]
  fn test_invalid_pointer() {
    let mut b = step("b");
    b.deferred_parameters.insert("x".to_string(), reference("a", "id"));
    let chain = ChainDef {
      name: "pointer".to_string(),
      kind: None,
      steps: vec![step("a"), b],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::InvalidPointer { .. })
    ));
  }

  #[test]
  fn test_unsupported_method() {
    let mut a = step("a");
    a.method = "TRACE".to_string();
    let mut b = step("b");
    b.method = "post".to_string();

    let chain = ChainDef {
      name: "methods".to_string(),
      kind: None,
      steps: vec![b.clone(), a],
    };
    assert!(matches!(
      chain.validate(),
      Err(ConfigError::UnsupportedMethod { method, .. }) if method == "TRACE"
    ));

    let chain = ChainDef {
      name: "lowercase".to_string(),
      kind: None,
      steps: vec![b],
    };
    assert!(chain.validate().is_ok());
  }
}
