use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_NAME: &str = "engine-core.log";

/// For one-shot console commands that should not leave files behind.
pub fn init_stderr_only(level: &str) -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(env_filter(level))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_target(false),
    )
    .try_init()?;
  Ok(())
}

/// Daily-rolling file log plus stderr, with old files pruned first.
pub fn init_file_and_stderr(
  log_dir: &Path,
  level: &str,
  retention_days: u64,
) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  cleanup_old_logs(log_dir, retention_days)?;

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(true);

  tracing_subscriber::registry()
    .with(env_filter(level))
    .with(file_layer)
    .with(stderr_layer)
    .try_init()?;

  Ok(())
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
  tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Removes rolled engine logs last modified before the retention cutoff. 0 keeps everything.
fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
  if retention_days == 0 {
    return Ok(());
  }
  let max_age = Duration::from_secs(retention_days.saturating_mul(86_400));
  let cutoff = SystemTime::now()
    .checked_sub(max_age)
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return Ok(());
  };

  let stale: Vec<PathBuf> = entries
    .flatten()
    .filter(|e| is_engine_log_file(&e.path()))
    .filter(|e| {
      e.metadata()
        .and_then(|m| m.modified())
        .map(|t| t < cutoff)
        .unwrap_or(false)
    })
    .map(|e| e.path())
    .collect();

  for path in stale {
    if let Err(e) = fs::remove_file(&path) {
      tracing::debug!(path = %path.display(), error = %e, "could not prune old log");
    }
  }
  Ok(())
}

fn is_engine_log_file(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .is_some_and(|n| n == LOG_FILE_NAME || n.starts_with(&format!("{LOG_FILE_NAME}.")))
}
