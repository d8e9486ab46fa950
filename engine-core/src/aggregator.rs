use crate::clock::{ClockState, ResolutionClock};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::impact::{impact_for, ReputationImpact};
use crate::ledger::{
  read_failure, AttestationLedger, Ledgers, RawReport, ReportLedger, ReputationLedger, VoteTally,
};
use crate::pointer::PointerResolver;
use crate::scoring::ConfidenceScorer;
use crate::types::{Category, LifecycleState, Severity, ThreatReport};
use futures_util::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedReport {
  pub report: ThreatReport,
  pub pointer_url: String,
  pub submitter_reputation: i64,
  pub consensus_confidence: u8,
  pub clock: ClockState,
  pub lifecycle: LifecycleState,
  pub impact: ReputationImpact,
}

pub fn derive_lifecycle(resolved: bool, clock: ClockState) -> LifecycleState {
  if resolved {
    LifecycleState::Resolved
  } else if clock.expired {
    LifecycleState::Expired
  } else {
    LifecycleState::Open
  }
}

/// Reads every report from the ledgers and enriches it.
///
/// `latest` only changes when a whole cycle succeeds; a failed read anywhere
/// leaves the previous sequence in place.
pub struct ThreatAggregator {
  reports: Arc<dyn ReportLedger>,
  attestations: Arc<dyn AttestationLedger>,
  reputation: Arc<dyn ReputationLedger>,
  scorer: ConfidenceScorer,
  clock: ResolutionClock,
  pointers: PointerResolver,
  max_concurrent_reads: usize,
  latest: Vec<EnrichedReport>,
}

impl ThreatAggregator {
  pub fn new(ledgers: &Ledgers, cfg: &Config) -> Self {
    Self {
      reports: ledgers.reports.clone(),
      attestations: ledgers.attestations.clone(),
      reputation: ledgers.reputation.clone(),
      scorer: ConfidenceScorer::from_config(&cfg.scoring),
      clock: ResolutionClock::from_config(&cfg.clock),
      pointers: PointerResolver::from_config(&cfg.gateway),
      max_concurrent_reads: cfg.aggregator.max_concurrent_reads.max(1),
      latest: Vec::new(),
    }
  }

  pub fn latest(&self) -> &[EnrichedReport] {
    &self.latest
  }

  pub async fn refresh(&mut self, now: u64) -> Result<&[EnrichedReport]> {
    match self.collect(now).await {
      Ok(reports) => {
        tracing::debug!(count = reports.len(), "refresh cycle complete");
        self.latest = reports;
        Ok(&self.latest)
      }
      Err(e) => {
        tracing::warn!(error = %e, kept = self.latest.len(), "refresh aborted; keeping previous reports");
        Err(e)
      }
    }
  }

  /// One cycle's worth of reads, ids ascending from 1.
  pub async fn collect(&self, now: u64) -> Result<Vec<EnrichedReport>> {
    let count = self.reports.report_counter().await.map_err(read_failure)?;

    stream::iter(1..=count)
      .map(|id| self.read_one(id, now))
      .buffered(self.max_concurrent_reads)
      .try_collect()
      .await
  }

  async fn read_one(&self, id: u64, now: u64) -> Result<EnrichedReport> {
    let raw = self.reports.report_by_id(id).await.map_err(read_failure)?;
    let tally = self
      .attestations
      .get_report_stats(id)
      .await
      .map_err(read_failure)?;
    let reputation = self
      .reputation
      .reputation_score(&raw.submitter)
      .await
      .map_err(read_failure)?;
    self.enrich(id, raw, tally, reputation, now)
  }

  pub fn enrich(
    &self,
    id: u64,
    raw: RawReport,
    tally: VoteTally,
    reputation: i64,
    now: u64,
  ) -> Result<EnrichedReport> {
    let severity = Severity::from_ledger(raw.severity)
      .ok_or_else(|| EngineError::network(format!("report {id}: malformed severity {}", raw.severity)))?;
    let category = Category::from_ledger(raw.category)
      .ok_or_else(|| EngineError::network(format!("report {id}: malformed category {}", raw.category)))?;

    let clock = self.clock.derive_state(raw.submitted_at, now);
    let report = ThreatReport {
      id,
      submitter: raw.submitter,
      payload_hash: raw.payload_hash,
      storage_pointer: raw.storage_pointer,
      severity,
      category,
      submitted_at: raw.submitted_at,
      resolved: raw.resolved,
      valid_votes: tally.valid,
      invalid_votes: tally.invalid,
    };

    Ok(EnrichedReport {
      pointer_url: self.pointers.resolve(&report.storage_pointer),
      submitter_reputation: reputation,
      consensus_confidence: self
        .scorer
        .consensus_confidence(report.valid_votes, report.invalid_votes),
      clock,
      lifecycle: derive_lifecycle(report.resolved, clock),
      impact: impact_for(severity),
      report,
    })
  }
}
