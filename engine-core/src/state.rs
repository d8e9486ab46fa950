use crate::aggregator::{derive_lifecycle, EnrichedReport};
use crate::clock::ResolutionClock;
use crate::scoring::ConfidenceScorer;
use crate::types::LifecycleState;
use std::collections::BTreeMap;

/// Everything the engine shows for one report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportState {
  pub view: EnrichedReport,
  pub artifact_confidence: Option<f64>,
  pub final_confidence: u8,
}

impl ReportState {
  pub fn id(&self) -> u64 {
    self.view.report.id
  }

  pub fn lifecycle(&self) -> LifecycleState {
    self.view.lifecycle
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
  Refreshed(EnrichedReport),
  Tick { now: u64 },
  ArtifactLoaded { confidence: Option<f64> },
  ResolveConfirmed,
  SettlementConfirmed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reducer {
  scorer: ConfidenceScorer,
  clock: ResolutionClock,
}

impl Reducer {
  pub fn new(scorer: ConfidenceScorer, clock: ResolutionClock) -> Self {
    Self { scorer, clock }
  }

  pub fn init(&self, view: EnrichedReport) -> ReportState {
    let final_confidence = view.consensus_confidence;
    ReportState {
      view,
      artifact_confidence: None,
      final_confidence,
    }
  }

  /// Pure: the new state depends only on the old state and the event.
  /// Lifecycle never moves backwards.
  pub fn reduce(&self, state: ReportState, event: &ReportEvent) -> ReportState {
    let ReportState {
      mut view,
      mut artifact_confidence,
      ..
    } = state;
    let previous = view.lifecycle;

    match event {
      ReportEvent::Refreshed(fresh) => {
        view = fresh.clone();
      }
      ReportEvent::Tick { now } => {
        view.clock = self.clock.derive_state(view.report.submitted_at, *now);
        view.lifecycle = derive_lifecycle(view.report.resolved, view.clock);
      }
      ReportEvent::ArtifactLoaded { confidence } => {
        artifact_confidence = *confidence;
      }
      ReportEvent::ResolveConfirmed => {
        view.report.resolved = true;
        view.lifecycle = LifecycleState::Resolved;
      }
      ReportEvent::SettlementConfirmed => {
        view.lifecycle = LifecycleState::Settled;
      }
    }

    view.lifecycle = view.lifecycle.max(previous);
    let final_confidence = self
      .scorer
      .final_confidence(artifact_confidence, view.consensus_confidence);
    ReportState {
      view,
      artifact_confidence,
      final_confidence,
    }
  }
}

/// Per-id report states for one session, kept in id order.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
  reducer: Reducer,
  reports: BTreeMap<u64, ReportState>,
}

impl FeedState {
  pub fn new(reducer: Reducer) -> Self {
    Self {
      reducer,
      reports: BTreeMap::new(),
    }
  }

  /// Applies `event` to one report. Events other than `Refreshed` are ignored for unknown ids.
  pub fn apply(&mut self, id: u64, event: ReportEvent) {
    let current = match (self.reports.remove(&id), &event) {
      (Some(st), _) => st,
      (None, ReportEvent::Refreshed(view)) => self.reducer.init(view.clone()),
      (None, _) => return,
    };
    let next = self.reducer.reduce(current, &event);
    self.reports.insert(id, next);
  }

  /// Installs a complete refresh cycle; ids absent from the cycle are dropped.
  pub fn apply_refresh(&mut self, views: Vec<EnrichedReport>) {
    let keep: std::collections::HashSet<u64> = views.iter().map(|v| v.report.id).collect();
    self.reports.retain(|id, _| keep.contains(id));
    for view in views {
      let id = view.report.id;
      self.apply(id, ReportEvent::Refreshed(view));
    }
  }

  pub fn tick(&mut self, now: u64) {
    let ids: Vec<u64> = self.reports.keys().copied().collect();
    for id in ids {
      self.apply(id, ReportEvent::Tick { now });
    }
  }

  pub fn get(&self, id: u64) -> Option<&ReportState> {
    self.reports.get(&id)
  }

  pub fn ordered(&self) -> Vec<ReportState> {
    self.reports.values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.reports.len()
  }

  pub fn is_empty(&self) -> bool {
    self.reports.is_empty()
  }
}
