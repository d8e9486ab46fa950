use crate::artifact::fetch::{HttpTransport, StaticTransport};
use crate::artifact::upload::UploadClient;
use crate::artifact::{ArtifactResolver, ArtifactStatus};
use crate::clock::{ManualTime, SystemTime, TimeSource};
use crate::config::Config;
use crate::decoder::ErrorTaxonomyDecoder;
use crate::engine::Engine;
use crate::impact::impact_for;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::{Ledgers, RevertSignal};
use crate::pointer::PointerResolver;
use crate::state::ReportState;
use crate::types::{Category, Identity, Severity, Verdict};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

const DEMO_ADMIN: &str = "0xadmin";
const DEMO_SUBMITTER: &str = "0xa11ce";
const DEMO_ATTESTER: &str = "0xb0b";

pub async fn run_console_command(cfg: &Config, args: &[String]) -> anyhow::Result<()> {
  let args = strip_console_flag(args);

  if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  if let Some(i) = args.iter().position(|a| a == "--pointer") {
    return run_pointer(cfg, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--preview") {
    return run_preview(&args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--decode") {
    return run_decode(&args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--artifact") {
    return run_artifact(cfg, &args[i + 1..]).await;
  }

  if let Some(i) = args.iter().position(|a| a == "--upload") {
    return run_upload(cfg, &args[i + 1..]).await;
  }

  if args.iter().any(|a| a == "--simulate") {
    return run_simulate(cfg).await;
  }

  if let Some(i) = args.iter().position(|a| a == "--watch") {
    return run_watch(cfg, &args[i + 1..]).await;
  }

  eprintln!("Unknown command.");
  print_help();
  Ok(())
}

fn run_pointer(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let raw = tail.first().map(|s| s.as_str()).unwrap_or("");
  let url = PointerResolver::from_config(&cfg.gateway).resolve(raw);
  if url.is_empty() {
    println!("(no pointer)");
  } else {
    println!("{url}");
  }
  Ok(())
}

fn run_preview(tail: &[String]) -> anyhow::Result<()> {
  let Some(severity) = tail.first().and_then(|s| Severity::parse(s)) else {
    eprintln!("Expected: --preview low|medium|high");
    return Ok(());
  };
  let impact = impact_for(severity);
  println!("Severity: {}", severity.label());
  println!("Reward if validated: +{}", impact.reward);
  println!("Penalty if rejected: -{}", impact.penalty);
  Ok(())
}

fn run_decode(tail: &[String]) -> anyhow::Result<()> {
  let signal = RevertSignal {
    name: tail.first().filter(|s| s.as_str() != "-").cloned(),
    reason: tail.get(1).cloned(),
  };
  let decoded = ErrorTaxonomyDecoder::default().decode(&signal);
  println!("Kind: {:?}", decoded.kind);
  if let Some(name) = decoded.revert {
    println!("Revert: {name}");
  }
  println!("Message: {}", decoded.message);
  Ok(())
}

async fn run_artifact(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let url = tail.first().map(|s| s.as_str()).unwrap_or("");
  let transport = HttpTransport::new(&cfg.gateway)?;
  let resolver = ArtifactResolver::new(Arc::new(transport));
  let entry = resolver.fetch(0, url).await;

  match entry.status {
    ArtifactStatus::Ok => {
      let doc = entry.document().unwrap_or_default();
      println!("Artifact: {url}");
      println!("Type: {}", doc.kind.as_deref().unwrap_or("-"));
      match doc.confidence {
        Some(c) => println!("Declared confidence: {c}"),
        None => println!("Declared confidence: none"),
      }
      if let Some(d) = doc.description.as_deref() {
        println!("Description: {d}");
      }
      if let Some(a) = doc.recommended_action.as_deref() {
        println!("Recommended action: {a}");
      }
      for (k, v) in &doc.ioc {
        println!("IOC {k}: {v}");
      }
    }
    _ => {
      println!(
        "Artifact unavailable: {}",
        entry.error.as_deref().unwrap_or("unknown error")
      );
    }
  }
  Ok(())
}

async fn run_upload(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let Some(path) = tail.first() else {
    eprintln!("Expected: --upload <artifact.json>");
    return Ok(());
  };
  let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
  let document: serde_json::Value =
    serde_json::from_str(&text).with_context(|| format!("parse {path} as JSON"))?;

  let pointer = UploadClient::new(&cfg.gateway)?.upload_json(&document).await?;
  println!("Pointer: {pointer}");
  println!(
    "Gateway URL: {}",
    PointerResolver::from_config(&cfg.gateway).resolve(&pointer)
  );
  Ok(())
}

fn demo_ledger(cfg: &Config, time: Arc<dyn TimeSource>) -> MemoryLedger {
  MemoryLedger::new(Identity::new(DEMO_ADMIN))
    .with_time(time)
    .with_window(cfg.clock.resolution_window_seconds)
}

fn session(
  cfg: &Config,
  ledger: &MemoryLedger,
  who: &str,
  time: Arc<dyn TimeSource>,
) -> Arc<Engine> {
  let id = Identity::new(who);
  let ledgers = Ledgers::from_single(Arc::new(ledger.as_caller(&id)));
  Arc::new(Engine::new(
    cfg.clone(),
    id,
    ledgers,
    Arc::new(StaticTransport::new()),
    time,
  ))
}

async fn run_simulate(cfg: &Config) -> anyhow::Result<()> {
  let time = ManualTime::new(crate::types::now_unix_s());
  let ledger = demo_ledger(cfg, Arc::new(time.clone()));
  let alice = session(cfg, &ledger, DEMO_SUBMITTER, Arc::new(time.clone()));
  let bob = session(cfg, &ledger, DEMO_ATTESTER, Arc::new(time.clone()));

  alice.register_organization("Alice CERT").await?;
  bob.register_organization("Bob SOC").await?;
  println!("Registered {} and {}", alice.session(), bob.session());

  alice
    .submit_report(
      r#"{"type":"c2","ioc":{"ip":"185.220.101.4"}}"#,
      "ipfs://QmSimulatedBeaconArtifact000000000000000",
      Severity::High,
      Category::Botnet,
    )
    .await?;
  bob.refresh().await?;
  print_feed("after submit", &bob.reports());

  bob.attest(1, Verdict::Valid).await?;
  print_feed("after attest", &bob.reports());

  let window = bob.config().clock.resolution_window_seconds;
  time.advance(window);
  bob.tick();
  print_feed("after window", &bob.reports());

  bob.resolve(1).await?;
  bob.settle(1).await?;
  print_feed("after settle", &bob.reports());

  match bob.settle(1).await {
    Ok(_) => println!("Second settlement unexpectedly succeeded"),
    Err(e) => println!("Second settlement rejected: {e}"),
  }

  let status = alice.organization_status(alice.session()).await?;
  println!(
    "{}: registered={} active={} reputation={}",
    status.wallet, status.registered, status.active, status.reputation
  );
  Ok(())
}

async fn run_watch(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let seconds = tail
    .first()
    .and_then(|s| s.parse::<u64>().ok())
    .unwrap_or(30);

  let time: Arc<dyn TimeSource> = Arc::new(SystemTime);
  let ledger = demo_ledger(cfg, time.clone());
  let alice = session(cfg, &ledger, DEMO_SUBMITTER, time.clone());
  let bob = session(cfg, &ledger, DEMO_ATTESTER, time.clone());
  alice.register_organization("Alice CERT").await?;
  bob.register_organization("Bob SOC").await?;
  for (i, severity) in [Severity::Low, Severity::Medium, Severity::High].into_iter().enumerate() {
    alice
      .submit_report(
        &format!("watch-ioc-{i}"),
        &format!("ipfs://QmWatch{i}"),
        severity,
        Category::Malware,
      )
      .await?;
  }

  let handle = bob.start();
  let mut every = tokio::time::interval(Duration::from_millis(cfg.clock.tick_millis.max(1)));
  let deadline = tokio::time::sleep(Duration::from_secs(seconds));
  tokio::pin!(deadline);

  loop {
    tokio::select! {
      _ = &mut deadline => break,
      _ = tokio::signal::ctrl_c() => {
        println!("Exiting.");
        break;
      }
      _ = every.tick() => print_feed("tick", &handle.engine().reports()),
    }
  }

  handle.shutdown().await;
  Ok(())
}

fn print_feed(label: &str, reports: &[ReportState]) {
  println!("-- {label} ({} reports)", reports.len());
  for st in reports {
    let r = &st.view.report;
    println!(
      "#{} {} {} by {} votes {}/{} of {} consensus {} final {} {:?} {}s left rep {}",
      r.id,
      r.severity.label(),
      r.category.label(),
      r.submitter,
      r.valid_votes,
      r.invalid_votes,
      r.total_attestations(),
      st.view.consensus_confidence,
      st.final_confidence,
      st.lifecycle(),
      st.view.clock.time_left,
      st.view.submitter_reputation
    );
  }
}

fn strip_console_flag(args: &[String]) -> Vec<String> {
  args
    .iter()
    .skip(1)
    .filter(|a| a.as_str() != "--console")
    .cloned()
    .collect()
}

fn print_help() {
  println!("Threat-intel engine v{} (console mode)", env!("CARGO_PKG_VERSION"));
  println!("Commands:");
  println!("  --pointer <storage-pointer>");
  println!("  --preview low|medium|high");
  println!("  --decode <revert-name|-> [reason]");
  println!("  --artifact <url>");
  println!("  --upload <artifact.json>");
  println!("  --simulate");
  println!("  --watch [seconds]");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn console_flag_and_program_name_are_stripped() {
    let out = strip_console_flag(&args(&["engine-core", "--console", "--preview", "high"]));
    assert_eq!(out, args(&["--preview", "high"]));
  }

  #[tokio::test]
  async fn simulate_runs_to_completion() {
    run_simulate(&Config::default()).await.unwrap();
  }

  #[tokio::test]
  async fn offline_commands_succeed() {
    let cfg = Config::default();
    for cmd in [
      &["engine-core", "--pointer", "ipfs://QmX"][..],
      &["engine-core", "--preview", "medium"][..],
      &["engine-core", "--decode", "AlreadyVoted"][..],
      &["engine-core", "--decode", "-", "custom reason"][..],
      &["engine-core", "--bogus"][..],
    ] {
      run_console_command(&cfg, &args(cmd)).await.unwrap();
    }
  }
}
