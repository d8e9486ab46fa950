use crate::clock::DEFAULT_RESOLUTION_WINDOW_SECONDS;
use crate::scoring::DEFAULT_ARTIFACT_WEIGHT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub gateway: GatewayConfig,
  pub scoring: ScoringConfig,
  pub clock: ClockConfig,
  pub aggregator: AggregatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
  #[serde(default = "default_gateway_base_url")]
  pub base_url: String,

  #[serde(default = "default_scheme_marker")]
  pub scheme_marker: String,

  #[serde(default = "default_gateway_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_max_artifact_bytes")]
  pub max_artifact_bytes: usize,

  #[serde(default = "default_upload_endpoint")]
  pub upload_endpoint: String,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      base_url: default_gateway_base_url(),
      scheme_marker: default_scheme_marker(),
      timeout_seconds: default_gateway_timeout_seconds(),
      max_artifact_bytes: default_max_artifact_bytes(),
      upload_endpoint: default_upload_endpoint(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
  #[serde(default = "default_artifact_weight")]
  pub artifact_weight: f64,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self {
      artifact_weight: default_artifact_weight(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
  #[serde(default = "default_resolution_window_seconds")]
  pub resolution_window_seconds: u64,

  #[serde(default = "default_tick_millis")]
  pub tick_millis: u64,
}

impl Default for ClockConfig {
  fn default() -> Self {
    Self {
      resolution_window_seconds: default_resolution_window_seconds(),
      tick_millis: default_tick_millis(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
  /// 1 reads reports one after another; larger values fan out while keeping id order.
  #[serde(default = "default_max_concurrent_reads")]
  pub max_concurrent_reads: usize,
}

impl Default for AggregatorConfig {
  fn default() -> Self {
    Self {
      max_concurrent_reads: default_max_concurrent_reads(),
    }
  }
}

fn default_gateway_base_url() -> String {
  "https://ipfs.io/ipfs/".to_string()
}

fn default_scheme_marker() -> String {
  "ipfs://".to_string()
}

fn default_gateway_timeout_seconds() -> u64 {
  10
}

fn default_max_artifact_bytes() -> usize {
  2 * 1024 * 1024
}

fn default_upload_endpoint() -> String {
  "http://localhost:4000/upload-json".to_string()
}

fn default_artifact_weight() -> f64 {
  DEFAULT_ARTIFACT_WEIGHT
}

fn default_resolution_window_seconds() -> u64 {
  DEFAULT_RESOLUTION_WINDOW_SECONDS
}

fn default_tick_millis() -> u64 {
  1000
}

fn default_max_concurrent_reads() -> usize {
  1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub gateway: Option<GatewayConfig>,

  #[serde(default)]
  pub scoring: Option<ScoringConfig>,

  #[serde(default)]
  pub clock: Option<ClockConfig>,

  #[serde(default)]
  pub aggregator: Option<AggregatorConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(g) = self.gateway {
      cfg.gateway = g;
    }
    if let Some(s) = self.scoring {
      cfg.scoring = s;
    }
    if let Some(c) = self.clock {
      cfg.clock = c;
    }
    if let Some(a) = self.aggregator {
      cfg.aggregator = a;
    }

    if let Some(reason) = validate_gateway(&cfg.gateway) {
      tracing::warn!(reason = %reason, "gateway config invalid; using defaults");
      cfg.gateway = GatewayConfig::default();
    }
    if let Some(reason) = validate_scoring(&cfg.scoring) {
      tracing::warn!(reason = %reason, "scoring config invalid; using defaults");
      cfg.scoring = ScoringConfig::default();
    }
    if let Some(reason) = validate_clock(&cfg.clock) {
      tracing::warn!(reason = %reason, "clock config invalid; using defaults");
      cfg.clock = ClockConfig::default();
    }
    if cfg.aggregator.max_concurrent_reads == 0 {
      tracing::warn!("aggregator.max_concurrent_reads must be > 0; using defaults");
      cfg.aggregator = AggregatorConfig::default();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none()
      || self.gateway.is_none()
      || self.scoring.is_none()
      || self.clock.is_none()
      || self.aggregator.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let needs_upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && needs_upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_ts()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "ti-engine: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", unix_ts()));
        let _ = fs::rename(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        eprintln!(
          "ti-engine: invalid config at {} (backed up to {}): {e}",
          path.display(),
          backup.display()
        );
      } else {
        eprintln!(
          "ti-engine: invalid config at {}; using defaults: {e}",
          path.display()
        );
      }
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    gateway: Some(cfg.gateway.clone()),
    scoring: Some(cfg.scoring.clone()),
    clock: Some(cfg.clock.clone()),
    aggregator: Some(cfg.aggregator.clone()),
  }
}

fn unix_ts() -> u64 {
  crate::types::now_unix_s()
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn validate_gateway(cfg: &GatewayConfig) -> Option<String> {
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.max_artifact_bytes == 0 {
    return Some("max_artifact_bytes must be > 0".to_string());
  }
  let Ok(url) = reqwest::Url::parse(&cfg.base_url) else {
    return Some(format!("invalid gateway base URL: {}", cfg.base_url));
  };
  if url.scheme() != "https" && url.scheme() != "http" {
    return Some(format!("gateway base must be http(s): {}", cfg.base_url));
  }
  None
}

fn validate_scoring(cfg: &ScoringConfig) -> Option<String> {
  if !cfg.artifact_weight.is_finite() || !(0.0..=1.0).contains(&cfg.artifact_weight) {
    return Some(format!(
      "artifact_weight must be within [0, 1], got {}",
      cfg.artifact_weight
    ));
  }
  None
}

fn validate_clock(cfg: &ClockConfig) -> Option<String> {
  if cfg.resolution_window_seconds == 0 {
    return Some("resolution_window_seconds must be > 0".to_string());
  }
  if cfg.tick_millis == 0 {
    return Some("tick_millis must be > 0".to_string());
  }
  None
}
