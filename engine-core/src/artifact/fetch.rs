use crate::config::GatewayConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
  pub status: u16,
  pub body: String,
}

impl GatewayResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

#[async_trait]
pub trait ArtifactTransport: Send + Sync {
  async fn get(&self, url: &str) -> Result<GatewayResponse>;
}

pub struct HttpTransport {
  client: Client,
  max_bytes: usize,
}

impl HttpTransport {
  pub fn new(cfg: &GatewayConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .redirect(Policy::limited(5))
      .build()
      .map_err(|e| EngineError::network(format!("build HTTP client: {e}")))?;
    Ok(Self {
      client,
      max_bytes: cfg.max_artifact_bytes,
    })
  }
}

#[async_trait]
impl ArtifactTransport for HttpTransport {
  async fn get(&self, url: &str) -> Result<GatewayResponse> {
    let parsed = Url::parse(url).map_err(|e| EngineError::network(format!("invalid URL: {e}")))?;
    let label = safe_url_label(&parsed);

    let response = self
      .client
      .get(parsed)
      .header(
        USER_AGENT,
        format!("ti-engine/{}", env!("CARGO_PKG_VERSION")),
      )
      .send()
      .await
      .map_err(|e| EngineError::network(format!("GET {label}: {e}")))?;

    let status = response.status().as_u16();
    let bytes = read_response_with_limit(response, self.max_bytes, &label).await?;
    Ok(GatewayResponse {
      status,
      body: String::from_utf8_lossy(&bytes).into_owned(),
    })
  }
}

async fn read_response_with_limit(
  mut response: Response,
  max_bytes: usize,
  label: &str,
) -> Result<Vec<u8>> {
  if let Some(len) = response.content_length() {
    if len > max_bytes as u64 {
      return Err(EngineError::network(format!(
        "{label}: response exceeds max size {max_bytes} bytes"
      )));
    }
  }

  let mut out = Vec::new();
  while let Some(chunk) = response
    .chunk()
    .await
    .map_err(|e| EngineError::network(format!("{label}: read response body: {e}")))?
  {
    out.extend_from_slice(&chunk);
    if out.len() > max_bytes {
      return Err(EngineError::network(format!(
        "{label}: response exceeds max size {max_bytes} bytes"
      )));
    }
  }
  Ok(out)
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

/// Canned responses keyed by URL; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct StaticTransport {
  responses: Mutex<HashMap<String, GatewayResponse>>,
}

impl StaticTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(self, url: &str, status: u16, body: &str) -> Self {
    self.insert(url, status, body);
    self
  }

  pub fn insert(&self, url: &str, status: u16, body: &str) {
    if let Ok(mut map) = self.responses.lock() {
      map.insert(
        url.to_string(),
        GatewayResponse {
          status,
          body: body.to_string(),
        },
      );
    }
  }
}

#[async_trait]
impl ArtifactTransport for StaticTransport {
  async fn get(&self, url: &str) -> Result<GatewayResponse> {
    let map = self
      .responses
      .lock()
      .map_err(|_| EngineError::network("transport state poisoned"))?;
    map
      .get(url)
      .cloned()
      .ok_or_else(|| EngineError::network(format!("GET {url}: connection refused")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_label_drops_query_and_credentials() {
    let url = Url::parse("https://user:pw@gw.example/ipfs/Qm1?token=secret").unwrap();
    assert_eq!(safe_url_label(&url), "gw.example/ipfs/Qm1");
  }

  #[test]
  fn success_range_is_2xx() {
    let ok = GatewayResponse {
      status: 204,
      body: String::new(),
    };
    let bad = GatewayResponse {
      status: 404,
      body: String::new(),
    };
    assert!(ok.is_success());
    assert!(!bad.is_success());
  }

  #[tokio::test]
  async fn static_transport_serves_known_urls_only() {
    let t = StaticTransport::new().with("https://gw/ipfs/a", 200, "{}");
    assert_eq!(t.get("https://gw/ipfs/a").await.unwrap().body, "{}");
    assert!(matches!(
      t.get("https://gw/ipfs/b").await,
      Err(EngineError::Network(_))
    ));
  }

  #[test]
  fn http_transport_builds_from_defaults() {
    assert!(HttpTransport::new(&GatewayConfig::default()).is_ok());
  }
}
