use crate::ledger::RevertSignal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertEntry {
  pub name: &'static str,
  pub message: &'static str,
}

pub const KNOWN_REVERTS: &[RevertEntry] = &[
  RevertEntry {
    name: "AlreadyRegistered",
    message: "This organization is already registered.",
  },
  RevertEntry {
    name: "NotRegistered",
    message: "This organization is not registered.",
  },
  RevertEntry {
    name: "AlreadyInactive",
    message: "This organization is already inactive.",
  },
  RevertEntry {
    name: "AlreadyActive",
    message: "This organization is already active.",
  },
  RevertEntry {
    name: "InvalidName",
    message: "The organization name is invalid.",
  },
  RevertEntry {
    name: "InvalidMetadata",
    message: "The organization metadata is invalid.",
  },
  RevertEntry {
    name: "AdminCannotRegister",
    message: "The administrator account cannot register as an organization.",
  },
  RevertEntry {
    name: "AlreadyVoted",
    message: "You have already voted on this report.",
  },
  RevertEntry {
    name: "ThreatNotResolved",
    message: "This report has not been resolved yet.",
  },
  RevertEntry {
    name: "ReputationAlreadyProcessed",
    message: "Reputation for this report has already been settled.",
  },
];

pub const GENERIC_REVERT_MESSAGE: &str = "Execution reverted";
pub const UNKNOWN_FAILURE_MESSAGE: &str = "Transaction failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  LedgerRevert,
  UnknownFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFailure {
  pub kind: FailureKind,
  /// Set only when the structured name was found in the table.
  pub revert: Option<&'static str>,
  pub message: String,
}

impl DecodedFailure {
  pub fn is(&self, name: &str) -> bool {
    self.revert == Some(name)
  }
}

impl fmt::Display for DecodedFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

#[derive(Debug, Clone)]
pub struct ErrorTaxonomyDecoder {
  entries: Vec<RevertEntry>,
}

impl Default for ErrorTaxonomyDecoder {
  fn default() -> Self {
    Self {
      entries: KNOWN_REVERTS.to_vec(),
    }
  }
}

impl ErrorTaxonomyDecoder {
  pub fn with_entry(mut self, name: &'static str, message: &'static str) -> Self {
    self.entries.retain(|e| e.name != name);
    self.entries.push(RevertEntry { name, message });
    self
  }

  pub fn lookup(&self, name: &str) -> Option<&RevertEntry> {
    self.entries.iter().find(|e| e.name == name)
  }

  pub fn decode(&self, signal: &RevertSignal) -> DecodedFailure {
    if let Some(name) = non_empty(signal.name.as_deref()) {
      return match self.lookup(name) {
        Some(entry) => DecodedFailure {
          kind: FailureKind::LedgerRevert,
          revert: Some(entry.name),
          message: entry.message.to_string(),
        },
        None => DecodedFailure {
          kind: FailureKind::LedgerRevert,
          revert: None,
          message: GENERIC_REVERT_MESSAGE.to_string(),
        },
      };
    }

    if let Some(reason) = non_empty(signal.reason.as_deref()) {
      return DecodedFailure {
        kind: FailureKind::LedgerRevert,
        revert: None,
        message: reason.to_string(),
      };
    }

    DecodedFailure {
      kind: FailureKind::UnknownFailure,
      revert: None,
      message: UNKNOWN_FAILURE_MESSAGE.to_string(),
    }
  }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
  v.map(str::trim).filter(|s| !s.is_empty())
}
