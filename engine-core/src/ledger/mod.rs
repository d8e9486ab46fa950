use crate::error::EngineError;
use crate::types::{Identity, Organization, PayloadHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

/// Failure payload of a ledger write, as handed back by the binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertSignal {
  pub name: Option<String>,
  pub reason: Option<String>,
}

impl RevertSignal {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      reason: None,
    }
  }

  pub fn reason(reason: impl Into<String>) -> Self {
    Self {
      name: None,
      reason: Some(reason.into()),
    }
  }

  /// Pulls a revert out of the error objects JSON-RPC wallets and providers return.
  pub fn from_json(value: &serde_json::Value) -> Self {
    let name = string_at(value, &["data", "errorName"])
      .or_else(|| string_at(value, &["errorName"]))
      .or_else(|| string_at(value, &["error", "data", "errorName"]));
    let reason = string_at(value, &["reason"])
      .or_else(|| string_at(value, &["shortMessage"]))
      .or_else(|| string_at(value, &["error", "message"]));
    Self { name, reason }
  }
}

fn string_at(value: &serde_json::Value, path: &[&str]) -> Option<String> {
  let mut cur = value;
  for key in path {
    cur = cur.get(key)?;
  }
  cur
    .as_str()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
  #[error("ledger transport failure: {0}")]
  Transport(String),

  #[error("ledger reverted")]
  Revert(RevertSignal),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Any failed read is a network error; reads have no revert taxonomy.
pub(crate) fn read_failure(e: LedgerError) -> EngineError {
  match e {
    LedgerError::Transport(msg) => EngineError::Network(msg),
    LedgerError::Revert(sig) => EngineError::Network(format!(
      "ledger read reverted: {}",
      sig.name.or(sig.reason).unwrap_or_else(|| "no reason".to_string())
    )),
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
  pub tx_id: String,
}

/// A report exactly as the report ledger stores it; enums are still raw codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReport {
  pub submitter: Identity,
  pub payload_hash: PayloadHash,
  pub storage_pointer: String,
  pub severity: u8,
  pub category: u8,
  pub submitted_at: u64,
  pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
  pub valid: u64,
  pub invalid: u64,
}

#[async_trait]
pub trait Registry: Send + Sync {
  async fn is_registered(&self, wallet: &Identity) -> LedgerResult<bool>;
  async fn is_active(&self, wallet: &Identity) -> LedgerResult<bool>;
  async fn admin(&self) -> LedgerResult<Identity>;
  async fn get_organizations(&self) -> LedgerResult<Vec<Organization>>;
  async fn get_organization(&self, wallet: &Identity) -> LedgerResult<Option<Organization>>;

  async fn register_organization(
    &self,
    name: &str,
    metadata_hash: PayloadHash,
  ) -> LedgerResult<TxReceipt>;
  async fn deactivate_organization(&self) -> LedgerResult<TxReceipt>;
  async fn reactivate_organization(&self) -> LedgerResult<TxReceipt>;
  async fn admin_deactivate(&self, wallet: &Identity) -> LedgerResult<TxReceipt>;
  async fn admin_reactivate(&self, wallet: &Identity) -> LedgerResult<TxReceipt>;
}

#[async_trait]
pub trait ReportLedger: Send + Sync {
  async fn report_counter(&self) -> LedgerResult<u64>;
  async fn report_by_id(&self, id: u64) -> LedgerResult<RawReport>;

  async fn submit_report(
    &self,
    payload_hash: PayloadHash,
    pointer: &str,
    severity: u8,
    category: u8,
  ) -> LedgerResult<TxReceipt>;
  async fn resolve_report(&self, id: u64) -> LedgerResult<TxReceipt>;
}

#[async_trait]
pub trait AttestationLedger: Send + Sync {
  async fn get_report_stats(&self, id: u64) -> LedgerResult<VoteTally>;
  async fn attest(&self, id: u64, verdict: u8) -> LedgerResult<TxReceipt>;
}

#[async_trait]
pub trait ReputationLedger: Send + Sync {
  async fn reputation_score(&self, wallet: &Identity) -> LedgerResult<i64>;
  async fn update_reputation_from_report(&self, id: u64) -> LedgerResult<TxReceipt>;
}

/// The four ledger collaborators a session talks to.
#[derive(Clone)]
pub struct Ledgers {
  pub registry: Arc<dyn Registry>,
  pub reports: Arc<dyn ReportLedger>,
  pub attestations: Arc<dyn AttestationLedger>,
  pub reputation: Arc<dyn ReputationLedger>,
}

impl Ledgers {
  pub fn from_single<L>(ledger: Arc<L>) -> Self
  where
    L: Registry + ReportLedger + AttestationLedger + ReputationLedger + 'static,
  {
    Self {
      registry: ledger.clone(),
      reports: ledger.clone(),
      attestations: ledger.clone(),
      reputation: ledger,
    }
  }
}
