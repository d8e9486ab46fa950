//! In-process ledger simulator.
//!
//! Mirrors the observable behaviour of the registry, report, attestation and
//! reputation contracts closely enough to drive the engine end to end: the same
//! revert names, the same 1-based dense report ids, one vote per organization.
//! Every clone shares state; `as_caller` switches the signing identity.

use super::{
  AttestationLedger, LedgerError, LedgerResult, RawReport, Registry, ReportLedger,
  ReputationLedger, RevertSignal, TxReceipt, VoteTally,
};
use crate::clock::{SystemTime, TimeSource, DEFAULT_RESOLUTION_WINDOW_SECONDS};
use crate::impact::impact_for;
use crate::types::{Identity, Organization, PayloadHash, Severity};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LedgerState {
  admin: Identity,
  orgs: Vec<Organization>,
  reports: Vec<RawReport>,
  votes: HashMap<u64, HashMap<Identity, u8>>,
  reputation: HashMap<Identity, i64>,
  processed: HashSet<u64>,
  reads: u64,
  fail_read_at: Option<u64>,
}

impl LedgerState {
  fn org(&self, wallet: &Identity) -> Option<&Organization> {
    self.orgs.iter().find(|o| &o.wallet == wallet)
  }

  fn org_mut(&mut self, wallet: &Identity) -> Option<&mut Organization> {
    self.orgs.iter_mut().find(|o| &o.wallet == wallet)
  }

  fn report(&self, id: u64) -> LedgerResult<&RawReport> {
    let idx = id.checked_sub(1).ok_or_else(invalid_report)? as usize;
    self.reports.get(idx).ok_or_else(invalid_report)
  }

  fn tally(&self, id: u64) -> VoteTally {
    let mut out = VoteTally::default();
    if let Some(votes) = self.votes.get(&id) {
      for verdict in votes.values() {
        match verdict {
          1 => out.valid += 1,
          _ => out.invalid += 1,
        }
      }
    }
    out
  }

  fn require_active_org(&self, wallet: &Identity) -> LedgerResult<()> {
    match self.org(wallet) {
      None => Err(revert("NotRegistered")),
      Some(o) if !o.active => Err(reason("Organization is inactive")),
      Some(_) => Ok(()),
    }
  }
}

#[derive(Clone)]
pub struct MemoryLedger {
  state: Arc<Mutex<LedgerState>>,
  caller: Identity,
  time: Arc<dyn TimeSource>,
  window_seconds: u64,
}

impl MemoryLedger {
  pub fn new(admin: Identity) -> Self {
    let state = LedgerState {
      admin: admin.clone(),
      ..LedgerState::default()
    };
    Self {
      state: Arc::new(Mutex::new(state)),
      caller: admin,
      time: Arc::new(SystemTime),
      window_seconds: DEFAULT_RESOLUTION_WINDOW_SECONDS,
    }
  }

  pub fn with_time(mut self, time: Arc<dyn TimeSource>) -> Self {
    self.time = time;
    self
  }

  pub fn with_window(mut self, window_seconds: u64) -> Self {
    self.window_seconds = window_seconds;
    self
  }

  /// Same shared ledger, different signer.
  pub fn as_caller(&self, caller: &Identity) -> Self {
    Self {
      caller: caller.clone(),
      ..self.clone()
    }
  }

  pub fn caller(&self) -> &Identity {
    &self.caller
  }

  /// Makes the k-th read from now (1-based) fail with a transport error.
  pub fn fail_read_at(&self, k: u64) {
    if let Ok(mut st) = self.state.lock() {
      st.fail_read_at = Some(st.reads.saturating_add(k));
    }
  }

  fn lock(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
    self
      .state
      .lock()
      .map_err(|_| LedgerError::Transport("ledger state poisoned".to_string()))
  }

  fn read(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
    let mut st = self.lock()?;
    st.reads += 1;
    if st.fail_read_at == Some(st.reads) {
      st.fail_read_at = None;
      return Err(LedgerError::Transport(format!(
        "simulated read failure at read #{}",
        st.reads
      )));
    }
    Ok(st)
  }

  fn receipt(&self, action: &str) -> TxReceipt {
    let tx_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(caller = %self.caller, tx_id = %tx_id, action, "simulated ledger write");
    TxReceipt { tx_id }
  }

  fn set_active(&self, wallet: &Identity, active: bool) -> LedgerResult<()> {
    let mut st = self.lock()?;
    let org = st.org_mut(wallet).ok_or_else(|| revert("NotRegistered"))?;
    if org.active == active {
      return Err(revert(if active {
        "AlreadyActive"
      } else {
        "AlreadyInactive"
      }));
    }
    org.active = active;
    Ok(())
  }

  fn require_admin(&self) -> LedgerResult<()> {
    let st = self.lock()?;
    if self.caller != st.admin {
      return Err(reason("Caller is not the admin"));
    }
    Ok(())
  }
}

fn revert(name: &str) -> LedgerError {
  LedgerError::Revert(RevertSignal::named(name))
}

fn reason(text: &str) -> LedgerError {
  LedgerError::Revert(RevertSignal::reason(text))
}

fn invalid_report() -> LedgerError {
  reason("Invalid threat id")
}

#[async_trait]
impl Registry for MemoryLedger {
  async fn is_registered(&self, wallet: &Identity) -> LedgerResult<bool> {
    Ok(self.read()?.org(wallet).is_some())
  }

  async fn is_active(&self, wallet: &Identity) -> LedgerResult<bool> {
    Ok(self.read()?.org(wallet).map(|o| o.active).unwrap_or(false))
  }

  async fn admin(&self) -> LedgerResult<Identity> {
    Ok(self.read()?.admin.clone())
  }

  async fn get_organizations(&self) -> LedgerResult<Vec<Organization>> {
    Ok(self.read()?.orgs.clone())
  }

  async fn get_organization(&self, wallet: &Identity) -> LedgerResult<Option<Organization>> {
    Ok(self.read()?.org(wallet).cloned())
  }

  async fn register_organization(
    &self,
    name: &str,
    metadata_hash: PayloadHash,
  ) -> LedgerResult<TxReceipt> {
    {
      let mut st = self.lock()?;
      if self.caller == st.admin {
        return Err(revert("AdminCannotRegister"));
      }
      if st.org(&self.caller).is_some() {
        return Err(revert("AlreadyRegistered"));
      }
      if name.trim().is_empty() {
        return Err(revert("InvalidName"));
      }
      if metadata_hash.is_zero() {
        return Err(revert("InvalidMetadata"));
      }
      st.orgs.push(Organization {
        wallet: self.caller.clone(),
        name: name.trim().to_string(),
        active: true,
      });
    }
    Ok(self.receipt("registerOrganization"))
  }

  async fn deactivate_organization(&self) -> LedgerResult<TxReceipt> {
    self.set_active(&self.caller, false)?;
    Ok(self.receipt("deactivateOrganization"))
  }

  async fn reactivate_organization(&self) -> LedgerResult<TxReceipt> {
    self.set_active(&self.caller, true)?;
    Ok(self.receipt("reactivateOrganization"))
  }

  async fn admin_deactivate(&self, wallet: &Identity) -> LedgerResult<TxReceipt> {
    self.require_admin()?;
    self.set_active(wallet, false)?;
    Ok(self.receipt("adminDeactivate"))
  }

  async fn admin_reactivate(&self, wallet: &Identity) -> LedgerResult<TxReceipt> {
    self.require_admin()?;
    self.set_active(wallet, true)?;
    Ok(self.receipt("adminReactivate"))
  }
}

#[async_trait]
impl ReportLedger for MemoryLedger {
  async fn report_counter(&self) -> LedgerResult<u64> {
    Ok(self.read()?.reports.len() as u64)
  }

  async fn report_by_id(&self, id: u64) -> LedgerResult<RawReport> {
    self.read()?.report(id).cloned()
  }

  async fn submit_report(
    &self,
    payload_hash: PayloadHash,
    pointer: &str,
    severity: u8,
    category: u8,
  ) -> LedgerResult<TxReceipt> {
    {
      let mut st = self.lock()?;
      st.require_active_org(&self.caller)?;
      if payload_hash.is_zero() {
        return Err(reason("Empty payload hash"));
      }
      if pointer.is_empty() {
        return Err(reason("Empty storage pointer"));
      }
      if !(1..=3).contains(&severity) {
        return Err(reason("Invalid severity"));
      }
      if !(1..=3).contains(&category) {
        return Err(reason("Invalid category"));
      }
      st.reports.push(RawReport {
        submitter: self.caller.clone(),
        payload_hash,
        storage_pointer: pointer.to_string(),
        severity,
        category,
        submitted_at: self.time.now_unix_s(),
        resolved: false,
      });
    }
    Ok(self.receipt("submitReport"))
  }

  async fn resolve_report(&self, id: u64) -> LedgerResult<TxReceipt> {
    {
      let now = self.time.now_unix_s();
      let mut st = self.lock()?;
      let report = st.report(id)?;
      if report.resolved {
        return Err(reason("Threat already resolved"));
      }
      if now < report.submitted_at.saturating_add(self.window_seconds) {
        return Err(reason("Voting period still active"));
      }
      let idx = (id - 1) as usize;
      st.reports[idx].resolved = true;
    }
    Ok(self.receipt("resolveReport"))
  }
}

#[async_trait]
impl AttestationLedger for MemoryLedger {
  async fn get_report_stats(&self, id: u64) -> LedgerResult<VoteTally> {
    let st = self.read()?;
    st.report(id)?;
    Ok(st.tally(id))
  }

  async fn attest(&self, id: u64, verdict: u8) -> LedgerResult<TxReceipt> {
    {
      let now = self.time.now_unix_s();
      let mut st = self.lock()?;
      st.require_active_org(&self.caller)?;
      let report = st.report(id)?;
      if verdict != 1 && verdict != 2 {
        return Err(reason("Invalid verdict"));
      }
      if report.submitter == self.caller {
        return Err(reason("Submitter cannot attest own threat"));
      }
      if report.resolved || now >= report.submitted_at.saturating_add(self.window_seconds) {
        return Err(reason("Voting period ended"));
      }
      let votes = st.votes.entry(id).or_default();
      if votes.contains_key(&self.caller) {
        return Err(revert("AlreadyVoted"));
      }
      votes.insert(self.caller.clone(), verdict);
    }
    Ok(self.receipt("attest"))
  }
}

#[async_trait]
impl ReputationLedger for MemoryLedger {
  async fn reputation_score(&self, wallet: &Identity) -> LedgerResult<i64> {
    Ok(self.read()?.reputation.get(wallet).copied().unwrap_or(0))
  }

  async fn update_reputation_from_report(&self, id: u64) -> LedgerResult<TxReceipt> {
    {
      let mut st = self.lock()?;
      let report = st.report(id)?.clone();
      if !report.resolved {
        return Err(revert("ThreatNotResolved"));
      }
      if st.processed.contains(&id) {
        return Err(revert("ReputationAlreadyProcessed"));
      }
      let tally = st.tally(id);
      let impact = Severity::from_ledger(report.severity)
        .map(impact_for)
        .ok_or_else(|| reason("Invalid severity"))?;
      let delta = if tally.valid > tally.invalid {
        impact.reward
      } else if tally.invalid > tally.valid {
        -impact.penalty
      } else {
        0
      };
      *st.reputation.entry(report.submitter.clone()).or_insert(0) += delta;
      st.processed.insert(id);
    }
    Ok(self.receipt("updateReputationFromReport"))
  }
}
