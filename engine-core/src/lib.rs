mod actions;
pub mod aggregator;
pub mod artifact;
pub mod clock;
pub mod config;
pub mod console;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod impact;
pub mod ledger;
pub mod logging;
pub mod paths;
pub mod pointer;
pub mod scoring;
pub mod state;
pub mod types;

pub use engine::{Engine, EngineHandle, Refreshed};
pub use error::{EngineError, Result};

pub async fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let one_shot = is_one_shot(args);
  let cfg = if one_shot {
    config::load_or_default_readonly(&config_path)?
  } else {
    config::load_or_create_default(&config_path)?
  };

  if one_shot {
    logging::init_stderr_only(&cfg.logging.level)?;
  } else {
    logging::init_file_and_stderr(
      &paths::logs_dir(&base),
      &cfg.logging.level,
      cfg.logging.retention_days,
    )?;
  }

  tracing::debug!(config = %config_path.display(), "console starting");
  console::run_console_command(&cfg, args).await
}

/// Offline lookups that never touch a ledger or gateway.
fn is_one_shot(args: &[String]) -> bool {
  args.iter().any(|a| {
    matches!(
      a.as_str(),
      "--help" | "-h" | "--pointer" | "--preview" | "--decode"
    )
  })
}
