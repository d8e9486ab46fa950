use crate::config::ClockConfig;
use crate::types::now_unix_s;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_RESOLUTION_WINDOW_SECONDS: u64 = 300;

pub trait TimeSource: Send + Sync {
  fn now_unix_s(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
  fn now_unix_s(&self) -> u64 {
    now_unix_s()
  }
}

/// Hand-driven time, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
  now: Arc<AtomicU64>,
}

impl ManualTime {
  pub fn new(start: u64) -> Self {
    Self {
      now: Arc::new(AtomicU64::new(start)),
    }
  }

  pub fn advance(&self, seconds: u64) {
    self.now.fetch_add(seconds, Ordering::SeqCst);
  }
}

impl TimeSource for ManualTime {
  fn now_unix_s(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
  pub expired: bool,
  pub time_left: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolutionClock {
  window_seconds: u64,
}

impl Default for ResolutionClock {
  fn default() -> Self {
    Self {
      window_seconds: DEFAULT_RESOLUTION_WINDOW_SECONDS,
    }
  }
}

impl ResolutionClock {
  pub fn new(window_seconds: u64) -> Self {
    Self { window_seconds }
  }

  pub fn from_config(cfg: &ClockConfig) -> Self {
    Self::new(cfg.resolution_window_seconds)
  }

  pub fn window_seconds(&self) -> u64 {
    self.window_seconds
  }

  pub fn expiry(&self, submitted_at: u64) -> u64 {
    submitted_at.saturating_add(self.window_seconds)
  }

  pub fn derive_state(&self, submitted_at: u64, now: u64) -> ClockState {
    let expiry = self.expiry(submitted_at);
    ClockState {
      expired: now >= expiry,
      time_left: expiry.saturating_sub(now),
    }
  }
}
