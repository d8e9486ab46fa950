use crate::aggregator::ThreatAggregator;
use crate::artifact::fetch::ArtifactTransport;
use crate::artifact::{ArtifactCacheEntry, ArtifactResolver, NO_POINTER_MESSAGE};
use crate::clock::{ResolutionClock, TimeSource};
use crate::config::Config;
use crate::decoder::ErrorTaxonomyDecoder;
use crate::error::{EngineError, Result};
use crate::ledger::Ledgers;
use crate::scoring::ConfidenceScorer;
use crate::state::{FeedState, Reducer, ReportEvent, ReportState};
use crate::types::Identity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refreshed {
  Applied(usize),
  /// The engine was deactivated while the cycle was in flight.
  Discarded,
}

/// One session against the ledgers: aggregated feed, artifact cache and write actions.
///
/// Writes hold the read side of `write_gate` and refresh cycles hold the write side,
/// so a cycle never observes a half-applied local write.
pub struct Engine {
  pub(crate) cfg: Config,
  pub(crate) session: Identity,
  pub(crate) ledgers: Ledgers,
  pub(crate) decoder: ErrorTaxonomyDecoder,
  pub(crate) time: Arc<dyn TimeSource>,
  aggregator: tokio::sync::Mutex<ThreatAggregator>,
  feed: Mutex<FeedState>,
  artifacts: ArtifactResolver,
  pub(crate) write_gate: RwLock<()>,
  active: AtomicBool,
}

impl Engine {
  pub fn new(
    cfg: Config,
    session: Identity,
    ledgers: Ledgers,
    transport: Arc<dyn ArtifactTransport>,
    time: Arc<dyn TimeSource>,
  ) -> Self {
    let reducer = Reducer::new(
      ConfidenceScorer::from_config(&cfg.scoring),
      ResolutionClock::from_config(&cfg.clock),
    );
    Self {
      aggregator: tokio::sync::Mutex::new(ThreatAggregator::new(&ledgers, &cfg)),
      feed: Mutex::new(FeedState::new(reducer)),
      artifacts: ArtifactResolver::new(transport),
      decoder: ErrorTaxonomyDecoder::default(),
      write_gate: RwLock::new(()),
      active: AtomicBool::new(true),
      cfg,
      session,
      ledgers,
      time,
    }
  }

  pub fn session(&self) -> &Identity {
    &self.session
  }

  pub fn config(&self) -> &Config {
    &self.cfg
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }

  /// After this, in-flight refreshes and artifact loads are dropped instead of applied.
  pub fn deactivate(&self) {
    if self.active.swap(false, Ordering::SeqCst) {
      tracing::info!(session = %self.session, "engine deactivated");
    }
  }

  pub(crate) fn feed(&self) -> MutexGuard<'_, FeedState> {
    self.feed.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub(crate) fn apply(&self, id: u64, event: ReportEvent) {
    if self.is_active() {
      self.feed().apply(id, event);
    }
  }

  /// Runs one aggregation cycle. On failure the previous reports stay visible.
  pub async fn refresh(&self) -> Result<Refreshed> {
    if !self.is_active() {
      return Ok(Refreshed::Discarded);
    }
    let _gate = self.write_gate.write().await;
    let mut aggregator = self.aggregator.lock().await;
    let now = self.time.now_unix_s();
    let views = aggregator.refresh(now).await?.to_vec();

    if !self.is_active() {
      tracing::debug!("refresh finished after deactivation; discarded");
      return Ok(Refreshed::Discarded);
    }
    let count = views.len();
    self.feed().apply_refresh(views);
    Ok(Refreshed::Applied(count))
  }

  /// Re-derives clock state for every report without touching the ledgers.
  pub fn tick(&self) {
    if self.is_active() {
      let now = self.time.now_unix_s();
      self.feed().tick(now);
    }
  }

  pub fn reports(&self) -> Vec<ReportState> {
    self.feed().ordered()
  }

  pub fn report(&self, id: u64) -> Option<ReportState> {
    self.feed().get(id).cloned()
  }

  pub fn artifact(&self, id: u64) -> ArtifactCacheEntry {
    self.artifacts.entry(id)
  }

  /// Loads the artifact behind report `id` and folds its declared confidence into the report.
  pub async fn fetch_artifact(&self, id: u64) -> Result<ArtifactCacheEntry> {
    let url = self
      .report(id)
      .map(|st| st.view.pointer_url)
      .ok_or_else(|| EngineError::validation(format!("unknown report id {id}")))?;

    let entry = if url.is_empty() {
      ArtifactCacheEntry::error(None, NO_POINTER_MESSAGE)
    } else {
      if self.is_active() {
        self.artifacts.begin(id, &url);
      }
      self.artifacts.load(&url).await
    };

    if !self.is_active() {
      tracing::debug!(report_id = id, "artifact load finished after deactivation; discarded");
      return Ok(entry);
    }
    self.artifacts.merge(id, entry.clone());
    self.apply(
      id,
      ReportEvent::ArtifactLoaded {
        confidence: entry.declared_confidence(),
      },
    );
    Ok(entry)
  }

  fn tick_period(&self) -> Duration {
    Duration::from_millis(self.cfg.clock.tick_millis.max(1))
  }

  /// Spawns the periodic tick + refresh task. Requires a tokio runtime.
  pub fn start(self: &Arc<Self>) -> EngineHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Arc::clone(self);
    let task = tokio::spawn(run_schedule(Arc::clone(self), shutdown_rx));
    tracing::info!(
      session = %engine.session,
      tick_millis = engine.cfg.clock.tick_millis,
      "engine schedule started"
    );
    EngineHandle {
      engine,
      shutdown_tx,
      task,
    }
  }
}

async fn run_schedule(engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
  let mut interval = tokio::time::interval(engine.tick_period());
  interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      biased;
      _ = shutdown.changed() => break,
      _ = interval.tick() => {}
    }
    if *shutdown.borrow() {
      break;
    }

    engine.tick();

    tokio::select! {
      biased;
      _ = shutdown.changed() => break,
      res = engine.refresh() => {
        if let Err(e) = res {
          tracing::warn!(error = %e, "scheduled refresh failed");
        }
      }
    }
  }

  tracing::info!("engine schedule exiting");
}

pub struct EngineHandle {
  engine: Arc<Engine>,
  shutdown_tx: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl EngineHandle {
  pub fn engine(&self) -> &Arc<Engine> {
    &self.engine
  }

  /// Deactivates the engine, cancels the timer and waits for the task to exit.
  pub async fn shutdown(self) {
    self.engine.deactivate();
    let _ = self.shutdown_tx.send(true);
    if let Err(e) = self.task.await {
      tracing::warn!(error = %e, "engine schedule task ended abnormally");
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::artifact::fetch::StaticTransport;
  use crate::artifact::ArtifactStatus;
  use crate::clock::ManualTime;
  use crate::ledger::memory::MemoryLedger;
  use crate::ledger::{Registry, ReportLedger};
  use crate::types::{LifecycleState, PayloadHash};

  pub(crate) const T0: u64 = 1_700_000_000;

  pub(crate) fn engine_for(
    ledger: &MemoryLedger,
    who: &str,
    time: &ManualTime,
    transport: StaticTransport,
  ) -> Arc<Engine> {
    let session = Identity::new(who);
    let ledgers = Ledgers::from_single(Arc::new(ledger.as_caller(&session)));
    Arc::new(Engine::new(
      Config::default(),
      session,
      ledgers,
      Arc::new(transport),
      Arc::new(time.clone()),
    ))
  }

  pub(crate) async fn seeded(reports: u64) -> (MemoryLedger, ManualTime) {
    let time = ManualTime::new(T0);
    let ledger = MemoryLedger::new(Identity::new("0xadmin")).with_time(Arc::new(time.clone()));
    let alice = ledger.as_caller(&Identity::new("0xalice"));
    let meta = PayloadHash::of_text("metadata");
    alice.register_organization("Alice CERT", meta).await.unwrap();
    ledger
      .as_caller(&Identity::new("0xbob"))
      .register_organization("Bob SOC", meta)
      .await
      .unwrap();
    for i in 0..reports {
      alice
        .submit_report(PayloadHash::of_text(&format!("ioc-{i}")), &format!("ipfs://Qm{i}"), 2, 1)
        .await
        .unwrap();
    }
    (ledger, time)
  }

  #[tokio::test]
  async fn refresh_populates_feed_in_id_order() {
    let (ledger, time) = seeded(3).await;
    let engine = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    assert_eq!(engine.refresh().await.unwrap(), Refreshed::Applied(3));
    let ids: Vec<u64> = engine.reports().iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
  }

  #[tokio::test]
  async fn failed_refresh_keeps_previous_feed() {
    let (ledger, time) = seeded(2).await;
    let engine = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    engine.refresh().await.unwrap();
    let before = engine.reports();

    ledger.fail_read_at(3);
    let err = engine.refresh().await.unwrap_err();
    assert!(matches!(err, EngineError::Network(_)));
    assert_eq!(engine.reports(), before);
  }

  #[tokio::test]
  async fn tick_expires_reports_without_ledger_reads() {
    let (ledger, time) = seeded(1).await;
    let engine = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    engine.refresh().await.unwrap();

    time.advance(299);
    engine.tick();
    assert_eq!(engine.report(1).map(|r| r.lifecycle()), Some(LifecycleState::Open));

    time.advance(1);
    engine.tick();
    let st = engine.report(1).unwrap();
    assert!(st.view.clock.expired);
    assert_eq!(st.view.clock.time_left, 0);
    assert_eq!(st.lifecycle(), LifecycleState::Expired);
  }

  #[tokio::test]
  async fn artifact_confidence_feeds_final_confidence() {
    let (ledger, time) = seeded(1).await;
    let transport =
      StaticTransport::new().with("https://ipfs.io/ipfs/Qm0", 200, r#"{"type":"phishing","confidence":"80"}"#);
    let engine = engine_for(&ledger, "0xbob", &time, transport);
    engine.refresh().await.unwrap();
    engine.attest(1, crate::types::Verdict::Valid).await.unwrap();
    assert_eq!(engine.report(1).unwrap().final_confidence, 100);

    let entry = engine.fetch_artifact(1).await.unwrap();
    assert_eq!(entry.status, ArtifactStatus::Ok);
    // 0.6 * 80 + 0.4 * 100
    assert_eq!(engine.report(1).unwrap().final_confidence, 88);
    assert_eq!(engine.artifact(1).status, ArtifactStatus::Ok);
  }

  #[tokio::test]
  async fn artifact_failure_is_cached_per_report() {
    let (ledger, time) = seeded(2).await;
    let transport = StaticTransport::new()
      .with("https://ipfs.io/ipfs/Qm0", 502, "bad gateway")
      .with("https://ipfs.io/ipfs/Qm1", 200, r#"{"score":40}"#);
    let engine = engine_for(&ledger, "0xbob", &time, transport);
    engine.refresh().await.unwrap();

    let (a, b) = tokio::join!(engine.fetch_artifact(1), engine.fetch_artifact(2));
    assert_eq!(a.unwrap().status, ArtifactStatus::Error);
    assert_eq!(b.unwrap().status, ArtifactStatus::Ok);
    assert_eq!(engine.artifact(1).status, ArtifactStatus::Error);
    assert_eq!(engine.report(1).unwrap().final_confidence, 0);
    assert_eq!(engine.report(2).unwrap().final_confidence, 24);
  }

  #[tokio::test]
  async fn fetch_artifact_for_unknown_report_is_a_validation_error() {
    let (ledger, time) = seeded(0).await;
    let engine = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    assert!(matches!(
      engine.fetch_artifact(7).await,
      Err(EngineError::Validation(_))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn schedule_refreshes_until_shutdown() {
    let (ledger, time) = seeded(1).await;
    let engine = engine_for(&ledger, "0xbob", &time, StaticTransport::new());
    let handle = engine.start();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(engine.reports().len(), 1);

    handle.shutdown().await;
    assert!(!engine.is_active());

    ledger
      .as_caller(&Identity::new("0xalice"))
      .submit_report(PayloadHash::of_text("late"), "ipfs://QmLate", 1, 2)
      .await
      .unwrap();
    assert_eq!(engine.refresh().await.unwrap(), Refreshed::Discarded);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(engine.reports().len(), 1);
  }

  #[tokio::test]
  async fn deactivated_engine_ignores_artifact_results() {
    let (ledger, time) = seeded(1).await;
    let transport = StaticTransport::new().with("https://ipfs.io/ipfs/Qm0", 200, r#"{"confidence":90}"#);
    let engine = engine_for(&ledger, "0xbob", &time, transport);
    engine.refresh().await.unwrap();
    engine.deactivate();

    let entry = engine.fetch_artifact(1).await.unwrap();
    assert_eq!(entry.status, ArtifactStatus::Ok);
    assert_eq!(engine.report(1).unwrap().artifact_confidence, None);
    assert_eq!(engine.artifact(1).status, ArtifactStatus::Idle);
  }
}
