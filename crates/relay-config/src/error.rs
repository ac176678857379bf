use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("chain '{chain}' has no steps")]
  EmptyChain { chain: String },

  #[error("step id '{step_id}' is defined more than once")]
  DuplicateStep { step_id: String },

  /// A deferred input names a step that does not exist in the chain.
  #[error("step '{step_id}' references unknown step '{target}'")]
  UnknownReference { step_id: String, target: String },

  /// A deferred input names the step itself or a step that runs after it.
  #[error("step '{step_id}' references '{target}', which does not run before it")]
  ForwardReference { step_id: String, target: String },

  #[error("step '{step_id}' uses unsupported HTTP method '{method}'")]
  UnsupportedMethod { step_id: String, method: String },

  #[error("step '{step_id}' uses invalid JSON pointer '{pointer}'")]
  InvalidPointer { step_id: String, pointer: String },
}
