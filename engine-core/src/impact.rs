use crate::types::Severity;
use serde::{Deserialize, Serialize};

const BASE_REWARD: i64 = 10;
const BASE_PENALTY: i64 = 5;

// Preview only. The reputation ledger decides what is actually applied on settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationImpact {
  pub reward: i64,
  pub penalty: i64,
}

pub fn impact_for(severity: Severity) -> ReputationImpact {
  let multiplier = i64::from(severity.as_ledger());
  ReputationImpact {
    reward: BASE_REWARD * multiplier,
    penalty: BASE_PENALTY * multiplier,
  }
}
