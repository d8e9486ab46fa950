use crate::decoder::DecodedFailure;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
  /// Client-side precondition failure; raised before any network I/O.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("{0}")]
  Ledger(DecodedFailure),

  /// Transport or read failure with no structured decode.
  #[error("network error: {0}")]
  Network(String),

  #[error("artifact format error: {0}")]
  ArtifactFormat(String),
}

impl EngineError {
  pub fn validation(msg: impl Into<String>) -> Self {
    EngineError::Validation(msg.into())
  }

  pub fn network(msg: impl Into<String>) -> Self {
    EngineError::Network(msg.into())
  }

  pub fn decoded(&self) -> Option<&DecodedFailure> {
    match self {
      EngineError::Ledger(d) => Some(d),
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, EngineError>;
