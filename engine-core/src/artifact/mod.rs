use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

pub mod fetch;
pub mod schema;
pub mod upload;

use fetch::ArtifactTransport;
use schema::ArtifactDocument;

pub const NO_POINTER_MESSAGE: &str = "no pointer URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactStatus {
  #[default]
  Idle,
  Loading,
  Ok,
  Error,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactCacheEntry {
  pub status: ArtifactStatus,
  pub url: Option<String>,
  pub payload: Option<Value>,
  pub error: Option<String>,
}

impl ArtifactCacheEntry {
  pub fn loading(url: &str) -> Self {
    Self {
      status: ArtifactStatus::Loading,
      url: Some(url.to_string()),
      ..Self::default()
    }
  }

  pub fn ok(url: &str, payload: Value) -> Self {
    Self {
      status: ArtifactStatus::Ok,
      url: Some(url.to_string()),
      payload: Some(payload),
      error: None,
    }
  }

  pub fn error(url: Option<&str>, message: impl Into<String>) -> Self {
    Self {
      status: ArtifactStatus::Error,
      url: url.map(str::to_string),
      payload: None,
      error: Some(message.into()),
    }
  }

  pub fn document(&self) -> Option<ArtifactDocument> {
    match (self.status, &self.payload) {
      (ArtifactStatus::Ok, Some(v)) => Some(ArtifactDocument::from_value(v)),
      _ => None,
    }
  }

  pub fn declared_confidence(&self) -> Option<f64> {
    self.document().and_then(|d| d.confidence)
  }
}

/// Fetches report artifacts and keeps one cache entry per report id.
///
/// Writers only ever touch the entry for their own report; the map is never replaced.
pub struct ArtifactResolver {
  transport: Arc<dyn ArtifactTransport>,
  cache: RwLock<HashMap<u64, ArtifactCacheEntry>>,
}

impl ArtifactResolver {
  pub fn new(transport: Arc<dyn ArtifactTransport>) -> Self {
    Self {
      transport,
      cache: RwLock::new(HashMap::new()),
    }
  }

  pub async fn fetch(&self, report_id: u64, url: &str) -> ArtifactCacheEntry {
    if url.is_empty() {
      let entry = ArtifactCacheEntry::error(None, NO_POINTER_MESSAGE);
      self.merge(report_id, entry.clone());
      return entry;
    }

    self.begin(report_id, url);
    let entry = self.load(url).await;
    self.merge(report_id, entry.clone());
    entry
  }

  /// Marks the entry as loading. Paired with `load` + `merge` by callers that may discard.
  pub fn begin(&self, report_id: u64, url: &str) {
    self.merge(report_id, ArtifactCacheEntry::loading(url));
  }

  pub async fn load(&self, url: &str) -> ArtifactCacheEntry {
    if url.is_empty() {
      return ArtifactCacheEntry::error(None, NO_POINTER_MESSAGE);
    }
    match self.get_json(url).await {
      Ok(payload) => {
        tracing::debug!(url = %url, "artifact loaded");
        ArtifactCacheEntry::ok(url, payload)
      }
      Err(e) => {
        tracing::warn!(url = %url, error = %e, "artifact fetch failed");
        ArtifactCacheEntry::error(Some(url), e.to_string())
      }
    }
  }

  async fn get_json(&self, url: &str) -> Result<Value> {
    let response = self.transport.get(url).await?;
    if !response.is_success() {
      return Err(EngineError::ArtifactFormat(format!(
        "gateway answered HTTP {}; artifact is not readable JSON",
        response.status
      )));
    }
    serde_json::from_str::<Value>(&response.body).map_err(|_| {
      EngineError::ArtifactFormat("artifact is not valid JSON (or the gateway blocked it)".to_string())
    })
  }

  pub fn merge(&self, report_id: u64, entry: ArtifactCacheEntry) {
    self.write().insert(report_id, entry);
  }

  /// Returns the entry for `report_id`, creating it as `Idle` on first reference.
  pub fn entry(&self, report_id: u64) -> ArtifactCacheEntry {
    self.write().entry(report_id).or_default().clone()
  }

  pub fn peek(&self, report_id: u64) -> Option<ArtifactCacheEntry> {
    let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
    cache.get(&report_id).cloned()
  }

  pub fn snapshot(&self) -> HashMap<u64, ArtifactCacheEntry> {
    self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, ArtifactCacheEntry>> {
    self.cache.write().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::fetch::StaticTransport;
  use super::*;

  const URL_A: &str = "https://ipfs.io/ipfs/QmA";
  const URL_B: &str = "https://ipfs.io/ipfs/QmB";

  fn resolver() -> ArtifactResolver {
    let transport = StaticTransport::new()
      .with(URL_A, 200, r#"{"type":"malware","confidence":80}"#)
      .with(URL_B, 200, "<html>rate limited</html>")
      .with("https://ipfs.io/ipfs/gone", 404, r#"{"error":"not found"}"#);
    ArtifactResolver::new(Arc::new(transport))
  }

  #[tokio::test]
  async fn empty_url_errors_without_network() {
    let r = ArtifactResolver::new(Arc::new(StaticTransport::new()));
    let entry = r.fetch(1, "").await;
    assert_eq!(entry.status, ArtifactStatus::Error);
    assert_eq!(entry.error.as_deref(), Some("no pointer URL"));
    assert_eq!(entry.url, None);
  }

  #[tokio::test]
  async fn json_body_becomes_ok_entry() {
    let r = resolver();
    let entry = r.fetch(7, URL_A).await;
    assert_eq!(entry.status, ArtifactStatus::Ok);
    assert_eq!(entry.url.as_deref(), Some(URL_A));
    assert_eq!(entry.declared_confidence(), Some(80.0));
    assert_eq!(r.peek(7), Some(entry));
  }

  #[tokio::test]
  async fn non_json_body_is_format_error() {
    let entry = resolver().fetch(2, URL_B).await;
    assert_eq!(entry.status, ArtifactStatus::Error);
    assert!(entry.error.unwrap().contains("not valid JSON"));
  }

  #[tokio::test]
  async fn non_2xx_is_format_error_even_with_json_body() {
    let entry = resolver().fetch(3, "https://ipfs.io/ipfs/gone").await;
    assert_eq!(entry.status, ArtifactStatus::Error);
    assert!(entry.error.unwrap().contains("HTTP 404"));
  }

  #[tokio::test]
  async fn transport_failure_is_error_entry() {
    let entry = resolver().fetch(4, "https://unreachable.example/x").await;
    assert_eq!(entry.status, ArtifactStatus::Error);
    assert!(entry.error.unwrap().starts_with("network error"));
  }

  #[tokio::test]
  async fn merge_is_scoped_to_one_report() {
    let r = resolver();
    r.fetch(1, URL_A).await;
    r.fetch(2, URL_B).await;
    r.fetch(1, "").await;

    let snap = r.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap[&1].status, ArtifactStatus::Error);
    assert_eq!(snap[&2].status, ArtifactStatus::Error);
    assert_eq!(snap[&2].url.as_deref(), Some(URL_B));
  }

  #[tokio::test]
  async fn refetch_overwrites_previous_entry() {
    let transport = Arc::new(StaticTransport::new().with(URL_A, 200, r#"{"confidence":10}"#));
    let r = ArtifactResolver::new(transport.clone());
    assert_eq!(r.fetch(1, URL_A).await.declared_confidence(), Some(10.0));
    transport.insert(URL_A, 200, r#"{"confidence":90}"#);
    assert_eq!(r.fetch(1, URL_A).await.declared_confidence(), Some(90.0));
  }

  #[test]
  fn first_reference_creates_idle_entry() {
    let r = ArtifactResolver::new(Arc::new(StaticTransport::new()));
    assert_eq!(r.peek(5), None);
    assert_eq!(r.entry(5).status, ArtifactStatus::Idle);
    assert_eq!(r.peek(5).map(|e| e.status), Some(ArtifactStatus::Idle));
  }

  #[test]
  fn begin_marks_loading() {
    let r = ArtifactResolver::new(Arc::new(StaticTransport::new()));
    r.begin(9, URL_A);
    assert_eq!(r.entry(9).status, ArtifactStatus::Loading);
  }
}
