use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::ledger::{read_failure, LedgerError, LedgerResult, TxReceipt};
use crate::state::ReportEvent;
use crate::types::{Category, Identity, Organization, OrganizationStatus, PayloadHash, Severity, Verdict};
use std::future::Future;

/// Registration carries a fixed metadata digest; only the name is user supplied.
const REGISTRATION_METADATA: &str = "metadata";

impl Engine {
  pub async fn register_organization(&self, name: &str) -> Result<TxReceipt> {
    let name = name.trim();
    if name.is_empty() {
      return Err(EngineError::validation("organization name must not be empty"));
    }
    let metadata = PayloadHash::of_text(REGISTRATION_METADATA);
    self
      .write(
        "register_organization",
        None,
        self.ledgers.registry.register_organization(name, metadata),
      )
      .await
  }

  pub async fn deactivate_organization(&self) -> Result<TxReceipt> {
    self
      .write(
        "deactivate_organization",
        None,
        self.ledgers.registry.deactivate_organization(),
      )
      .await
  }

  pub async fn reactivate_organization(&self) -> Result<TxReceipt> {
    self
      .write(
        "reactivate_organization",
        None,
        self.ledgers.registry.reactivate_organization(),
      )
      .await
  }

  pub async fn admin_deactivate(&self, wallet: &Identity) -> Result<TxReceipt> {
    require_wallet(wallet)?;
    self
      .write("admin_deactivate", None, self.ledgers.registry.admin_deactivate(wallet))
      .await
  }

  pub async fn admin_reactivate(&self, wallet: &Identity) -> Result<TxReceipt> {
    require_wallet(wallet)?;
    self
      .write("admin_reactivate", None, self.ledgers.registry.admin_reactivate(wallet))
      .await
  }

  /// Hashes `payload` and anchors it together with the artifact pointer.
  pub async fn submit_report(
    &self,
    payload: &str,
    pointer: &str,
    severity: Severity,
    category: Category,
  ) -> Result<TxReceipt> {
    if payload.trim().is_empty() {
      return Err(EngineError::validation("report payload must not be empty"));
    }
    let pointer = pointer.trim();
    if pointer.is_empty() {
      return Err(EngineError::validation("storage pointer must not be empty"));
    }
    let hash = PayloadHash::of_text(payload);
    tracing::debug!(payload_hash = %hash, pointer = %pointer, "submitting report");
    self
      .write(
        "submit_report",
        None,
        self
          .ledgers
          .reports
          .submit_report(hash, pointer, severity.as_ledger(), category.as_ledger()),
      )
      .await
  }

  pub async fn attest(&self, id: u64, verdict: Verdict) -> Result<TxReceipt> {
    require_report_id(id)?;
    let submitter = self.submitter_of(id).await?;
    if submitter == self.session {
      return Err(EngineError::validation("submitter cannot attest their own report"));
    }
    self
      .write(
        "attest",
        Some(id),
        self.ledgers.attestations.attest(id, verdict.as_ledger()),
      )
      .await
  }

  pub async fn resolve(&self, id: u64) -> Result<TxReceipt> {
    require_report_id(id)?;
    let outcome = self
      .write_only("resolve", Some(id), self.ledgers.reports.resolve_report(id))
      .await;
    if outcome.is_ok() {
      self.apply(id, ReportEvent::ResolveConfirmed);
    }
    self.after_write(outcome).await
  }

  /// Applies the reputation outcome of a resolved report.
  ///
  /// A report that was already settled is still marked settled locally, but the
  /// decoded failure is returned to the caller.
  pub async fn settle(&self, id: u64) -> Result<TxReceipt> {
    require_report_id(id)?;
    let outcome = self
      .write_only(
        "settle",
        Some(id),
        self.ledgers.reputation.update_reputation_from_report(id),
      )
      .await;
    match &outcome {
      Ok(_) => self.apply(id, ReportEvent::SettlementConfirmed),
      Err(EngineError::Ledger(d)) if d.is("ReputationAlreadyProcessed") => {
        self.apply(id, ReportEvent::SettlementConfirmed)
      }
      Err(_) => {}
    }
    self.after_write(outcome).await
  }

  pub async fn organization_status(&self, wallet: &Identity) -> Result<OrganizationStatus> {
    let registry = &self.ledgers.registry;
    let registered = registry.is_registered(wallet).await.map_err(read_failure)?;
    let active = registry.is_active(wallet).await.map_err(read_failure)?;
    let admin = registry.admin().await.map_err(read_failure)?;
    let reputation = self
      .ledgers
      .reputation
      .reputation_score(wallet)
      .await
      .map_err(read_failure)?;
    Ok(OrganizationStatus {
      wallet: wallet.clone(),
      registered,
      active,
      reputation,
      is_admin: &admin == wallet,
    })
  }

  pub async fn organizations(&self) -> Result<Vec<Organization>> {
    self
      .ledgers
      .registry
      .get_organizations()
      .await
      .map_err(read_failure)
  }

  async fn submitter_of(&self, id: u64) -> Result<Identity> {
    if let Some(st) = self.report(id) {
      return Ok(st.view.report.submitter);
    }
    let raw = self
      .ledgers
      .reports
      .report_by_id(id)
      .await
      .map_err(read_failure)?;
    Ok(raw.submitter)
  }

  async fn write<F>(&self, action: &'static str, report_id: Option<u64>, call: F) -> Result<TxReceipt>
  where
    F: Future<Output = LedgerResult<TxReceipt>>,
  {
    let outcome = self.write_only(action, report_id, call).await;
    self.after_write(outcome).await
  }

  /// Submits one ledger write under the shared side of the write gate.
  async fn write_only<F>(
    &self,
    action: &'static str,
    report_id: Option<u64>,
    call: F,
  ) -> Result<TxReceipt>
  where
    F: Future<Output = LedgerResult<TxReceipt>>,
  {
    let outcome = {
      let _gate = self.write_gate.read().await;
      call.await
    };

    match outcome {
      Ok(receipt) => {
        tracing::info!(
          session = %self.session,
          action,
          report_id = ?report_id,
          tx_id = %receipt.tx_id,
          "ledger write confirmed"
        );
        Ok(receipt)
      }
      Err(LedgerError::Transport(msg)) => {
        tracing::warn!(session = %self.session, action, error = %msg, "ledger write failed");
        Err(EngineError::Network(msg))
      }
      Err(LedgerError::Revert(signal)) => {
        let decoded = self.decoder.decode(&signal);
        tracing::warn!(
          session = %self.session,
          action,
          report_id = ?report_id,
          revert = decoded.revert.unwrap_or("-"),
          message = %decoded.message,
          "ledger write rejected"
        );
        Err(EngineError::Ledger(decoded))
      }
    }
  }

  /// Confirmed writes trigger a refresh; a failed refresh does not fail the write.
  async fn after_write(&self, outcome: Result<TxReceipt>) -> Result<TxReceipt> {
    if outcome.is_ok() {
      if let Err(e) = self.refresh().await {
        tracing::warn!(error = %e, "refresh after write failed");
      }
    }
    outcome
  }
}

fn require_report_id(id: u64) -> Result<()> {
  if id == 0 {
    return Err(EngineError::validation("report ids start at 1"));
  }
  Ok(())
}

fn require_wallet(wallet: &Identity) -> Result<()> {
  if wallet.as_str().is_empty() {
    return Err(EngineError::validation("wallet must not be empty"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::artifact::fetch::StaticTransport;
  use crate::decoder::FailureKind;
  use crate::engine::tests::{engine_for, seeded, T0};
  use crate::engine::Refreshed;
  use crate::ledger::memory::MemoryLedger;
  use crate::ledger::{AttestationLedger, Ledgers, VoteTally};
  use crate::types::LifecycleState;
  use async_trait::async_trait;
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::sync::Notify;

  #[tokio::test]
  async fn full_report_lifecycle_through_settlement() {
    let (ledger, time) = seeded(0).await;
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());
    let bob = engine_for(&ledger, "0xbob", &time, StaticTransport::new());

    alice
      .submit_report("185.220.101.4 c2 beacon", "ipfs://QmBeacon", Severity::High, Category::Botnet)
      .await
      .unwrap();
    bob.refresh().await.unwrap();
    bob.attest(1, Verdict::Valid).await.unwrap();

    let st = bob.report(1).unwrap();
    assert_eq!(st.view.report.valid_votes, 1);
    assert_eq!(st.view.consensus_confidence, 100);
    assert_eq!(st.view.impact.reward, 30);
    assert_eq!(st.lifecycle(), LifecycleState::Open);

    time.advance(300);
    bob.tick();
    assert!(bob.report(1).unwrap().view.clock.expired);
    assert_eq!(bob.report(1).unwrap().lifecycle(), LifecycleState::Expired);

    bob.resolve(1).await.unwrap();
    assert_eq!(bob.report(1).unwrap().lifecycle(), LifecycleState::Resolved);

    bob.settle(1).await.unwrap();
    assert_eq!(bob.report(1).unwrap().lifecycle(), LifecycleState::Settled);
    assert_eq!(bob.report(1).unwrap().view.submitter_reputation, 30);

    let err = bob.settle(1).await.unwrap_err();
    let decoded = err.decoded().unwrap();
    assert!(decoded.is("ReputationAlreadyProcessed"));
    assert_eq!(decoded.kind, FailureKind::LedgerRevert);
    assert_eq!(bob.report(1).unwrap().lifecycle(), LifecycleState::Settled);

    let status = alice.organization_status(alice.session()).await.unwrap();
    assert!(status.registered && status.active && !status.is_admin);
    assert_eq!(status.reputation, 30);
  }

  #[tokio::test]
  async fn already_settled_elsewhere_still_marks_settled() {
    let (ledger, time) = seeded(1).await;
    let bob = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    let carol = engine_for(&ledger, "0xcarol", &time, StaticTransport::new());
    time.advance(301);
    bob.resolve(1).await.unwrap();
    carol.settle(1).await.unwrap();

    let err = bob.settle(1).await.unwrap_err();
    assert!(err.decoded().unwrap().is("ReputationAlreadyProcessed"));
    assert_eq!(bob.report(1).unwrap().lifecycle(), LifecycleState::Settled);
  }

  #[tokio::test]
  async fn self_attestation_is_rejected_before_the_ledger() {
    let (ledger, time) = seeded(1).await;
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());
    alice.refresh().await.unwrap();

    let err = alice.attest(1, Verdict::Valid).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(ledger.get_report_stats(1).await.unwrap(), VoteTally::default());
  }

  #[tokio::test]
  async fn self_attestation_check_reads_unknown_reports() {
    let (ledger, time) = seeded(1).await;
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());
    assert!(alice.report(1).is_none());
    assert!(matches!(
      alice.attest(1, Verdict::Invalid).await,
      Err(EngineError::Validation(_))
    ));
  }

  #[tokio::test]
  async fn empty_inputs_fail_validation_without_writes() {
    let (ledger, time) = seeded(0).await;
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());

    assert!(matches!(
      alice.register_organization("   ").await,
      Err(EngineError::Validation(_))
    ));
    assert!(matches!(
      alice.submit_report("", "ipfs://QmX", Severity::Low, Category::Malware).await,
      Err(EngineError::Validation(_))
    ));
    assert!(matches!(
      alice.submit_report("ioc", "  ", Severity::Low, Category::Malware).await,
      Err(EngineError::Validation(_))
    ));
    assert!(matches!(alice.resolve(0).await, Err(EngineError::Validation(_))));
    assert_eq!(alice.refresh().await.unwrap(), Refreshed::Applied(0));
  }

  #[tokio::test]
  async fn duplicate_vote_decodes_to_friendly_message() {
    let (ledger, time) = seeded(1).await;
    let bob = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    bob.attest(1, Verdict::Valid).await.unwrap();

    let err = bob.attest(1, Verdict::Invalid).await.unwrap_err();
    let decoded = err.decoded().unwrap();
    assert!(decoded.is("AlreadyVoted"));
    assert_eq!(decoded.message, "You have already voted on this report.");
  }

  #[tokio::test]
  async fn reason_only_revert_is_passed_through() {
    let (ledger, time) = seeded(1).await;
    let bob = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    let err = bob.resolve(1).await.unwrap_err();
    let decoded = err.decoded().unwrap();
    assert_eq!(decoded.revert, None);
    assert_eq!(decoded.message, "Voting period still active");
  }

  #[tokio::test]
  async fn registration_rules_surface_as_decoded_reverts() {
    let (ledger, time) = seeded(0).await;
    let admin = engine_for(&ledger, "0xadmin", &time, StaticTransport::new());
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());

    let err = admin.register_organization("Root").await.unwrap_err();
    assert!(err.decoded().unwrap().is("AdminCannotRegister"));
    let err = alice.register_organization("Alice again").await.unwrap_err();
    assert!(err.decoded().unwrap().is("AlreadyRegistered"));

    alice.deactivate_organization().await.unwrap();
    let err = alice.deactivate_organization().await.unwrap_err();
    assert!(err.decoded().unwrap().is("AlreadyInactive"));
    let err = alice
      .submit_report("ioc", "ipfs://QmX", Severity::Low, Category::Phishing)
      .await
      .unwrap_err();
    assert_eq!(err.decoded().unwrap().message, "Organization is inactive");

    admin.admin_reactivate(alice.session()).await.unwrap();
    assert!(alice.organization_status(alice.session()).await.unwrap().active);

    let orgs = admin.organizations().await.unwrap();
    assert_eq!(orgs.len(), 2);
    assert!(admin.organization_status(admin.session()).await.unwrap().is_admin);
  }

  #[tokio::test]
  async fn transport_failure_on_status_read_is_network_error() {
    let (ledger, time) = seeded(0).await;
    let alice = engine_for(&ledger, "0xalice", &time, StaticTransport::new());
    ledger.fail_read_at(2);
    assert!(matches!(
      alice.organization_status(alice.session()).await,
      Err(EngineError::Network(_))
    ));
  }

  /// Blocks every vote until released, so a refresh can be raced against it.
  struct HeldAttestations {
    inner: MemoryLedger,
    release: Arc<Notify>,
  }

  #[async_trait]
  impl AttestationLedger for HeldAttestations {
    async fn get_report_stats(&self, id: u64) -> LedgerResult<VoteTally> {
      self.inner.get_report_stats(id).await
    }

    async fn attest(&self, id: u64, verdict: u8) -> LedgerResult<TxReceipt> {
      self.release.notified().await;
      self.inner.attest(id, verdict).await
    }
  }

  #[tokio::test]
  async fn refresh_waits_for_in_flight_write() {
    let (ledger, time) = seeded(1).await;
    let session = Identity::new("0xbob");
    let bob_ledger = Arc::new(ledger.as_caller(&session));
    let release = Arc::new(Notify::new());
    let mut ledgers = Ledgers::from_single(bob_ledger.clone());
    ledgers.attestations = Arc::new(HeldAttestations {
      inner: (*bob_ledger).clone(),
      release: release.clone(),
    });
    let bob = Arc::new(crate::engine::Engine::new(
      crate::config::Config::default(),
      session,
      ledgers,
      Arc::new(StaticTransport::new()),
      Arc::new(time.clone()),
    ));
    bob.refresh().await.unwrap();

    let voter = tokio::spawn({
      let bob = bob.clone();
      async move { bob.attest(1, Verdict::Valid).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let refresher = tokio::spawn({
      let bob = bob.clone();
      async move { bob.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!refresher.is_finished());

    release.notify_one();
    voter.await.unwrap().unwrap();
    refresher.await.unwrap().unwrap();
    assert_eq!(bob.report(1).unwrap().view.report.valid_votes, 1);
    assert_eq!(bob.report(1).unwrap().view.report.submitted_at, T0);
  }
}
