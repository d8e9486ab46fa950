use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Wallet-style identity handle. Compared case-insensitively, stored lowercase.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
  pub fn new(handle: impl AsRef<str>) -> Self {
    Self(handle.as_ref().trim().to_ascii_lowercase())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PayloadHash(pub [u8; 32]);

impl PayloadHash {
  pub fn of_text(text: &str) -> Self {
    let digest = Keccak256::digest(text.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Self(out)
  }

  pub fn is_zero(&self) -> bool {
    self.0.iter().all(|b| *b == 0)
  }

  pub fn to_hex(&self) -> String {
    format!("0x{}", hex::encode(self.0))
  }
}

impl fmt::Display for PayloadHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
}

impl Severity {
  /// Ledger encoding: 1 = Low, 2 = Medium, anything from 3 up = High. Zero is not a severity.
  pub fn from_ledger(raw: u8) -> Option<Self> {
    match raw {
      0 => None,
      1 => Some(Severity::Low),
      2 => Some(Severity::Medium),
      _ => Some(Severity::High),
    }
  }

  pub fn as_ledger(self) -> u8 {
    match self {
      Severity::Low => 1,
      Severity::Medium => 2,
      Severity::High => 3,
    }
  }

  pub fn parse(text: &str) -> Option<Self> {
    match text.trim().to_ascii_lowercase().as_str() {
      "low" | "1" => Some(Severity::Low),
      "medium" | "2" => Some(Severity::Medium),
      "high" | "3" => Some(Severity::High),
      _ => None,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Severity::Low => "Low",
      Severity::Medium => "Medium",
      Severity::High => "High",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Malware,
  Phishing,
  Botnet,
}

impl Category {
  pub fn from_ledger(raw: u8) -> Option<Self> {
    match raw {
      1 => Some(Category::Malware),
      2 => Some(Category::Phishing),
      3 => Some(Category::Botnet),
      _ => None,
    }
  }

  pub fn as_ledger(self) -> u8 {
    match self {
      Category::Malware => 1,
      Category::Phishing => 2,
      Category::Botnet => 3,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Category::Malware => "Malware",
      Category::Phishing => "Phishing",
      Category::Botnet => "Botnet",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
  Valid,
  Invalid,
}

impl Verdict {
  pub fn as_ledger(self) -> u8 {
    match self {
      Verdict::Valid => 1,
      Verdict::Invalid => 2,
    }
  }
}

/// Ordered so that a lifecycle can only move forward: `max` of two states is the later one.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  #[default]
  Open,
  Expired,
  Resolved,
  Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatReport {
  pub id: u64,
  pub submitter: Identity,
  pub payload_hash: PayloadHash,
  pub storage_pointer: String,
  pub severity: Severity,
  pub category: Category,
  pub submitted_at: u64,
  pub resolved: bool,
  pub valid_votes: u64,
  pub invalid_votes: u64,
}

impl ThreatReport {
  pub fn total_attestations(&self) -> u64 {
    self.valid_votes.saturating_add(self.invalid_votes)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
  pub wallet: Identity,
  pub name: String,
  pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationStatus {
  pub wallet: Identity,
  pub registered: bool,
  pub active: bool,
  pub reputation: i64,
  pub is_admin: bool,
}

pub fn now_unix_s() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
