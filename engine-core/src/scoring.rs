use crate::config::ScoringConfig;

/// Share of the final score taken from the artifact's self-declared confidence.
pub const DEFAULT_ARTIFACT_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer {
  artifact_weight: f64,
}

impl Default for ConfidenceScorer {
  fn default() -> Self {
    Self {
      artifact_weight: DEFAULT_ARTIFACT_WEIGHT,
    }
  }
}

impl ConfidenceScorer {
  pub fn new(artifact_weight: f64) -> Self {
    Self {
      artifact_weight: artifact_weight.clamp(0.0, 1.0),
    }
  }

  pub fn from_config(cfg: &ScoringConfig) -> Self {
    Self::new(cfg.artifact_weight)
  }

  pub fn artifact_weight(&self) -> f64 {
    self.artifact_weight
  }

  /// Percentage of valid attestations, rounded half-up. Zero when nobody voted.
  pub fn consensus_confidence(&self, valid: u64, invalid: u64) -> u8 {
    let total = u128::from(valid) + u128::from(invalid);
    if total == 0 {
      return 0;
    }
    let pct = (200 * u128::from(valid) + total) / (2 * total);
    pct.min(100) as u8
  }

  pub fn final_confidence(&self, artifact_confidence: Option<f64>, consensus: u8) -> u8 {
    match artifact_confidence {
      Some(a) if a.is_finite() => round_percent(
        a * self.artifact_weight + f64::from(consensus) * (1.0 - self.artifact_weight),
      ),
      _ => consensus,
    }
  }
}

fn round_percent(v: f64) -> u8 {
  (v + 0.5).floor().clamp(0.0, 100.0) as u8
}
