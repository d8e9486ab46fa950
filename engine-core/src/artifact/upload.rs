use crate::config::GatewayConfig;
use crate::error::{EngineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub cid: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Serialize)]
struct UploadRequest<'a> {
  data: &'a Value,
}

/// Client for the pinning service that turns a JSON artifact into a storage pointer.
pub struct UploadClient {
  client: Client,
  endpoint: String,
  scheme_marker: String,
}

impl UploadClient {
  pub fn new(cfg: &GatewayConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .build()
      .map_err(|e| EngineError::network(format!("build HTTP client: {e}")))?;
    Ok(Self {
      client,
      endpoint: cfg.upload_endpoint.clone(),
      scheme_marker: cfg.scheme_marker.clone(),
    })
  }

  /// Uploads `document` and returns the pointer to submit with the report.
  pub async fn upload_json(&self, document: &Value) -> Result<String> {
    validate_document(document)?;

    let response = self
      .client
      .post(&self.endpoint)
      .json(&UploadRequest { data: document })
      .send()
      .await
      .map_err(|e| EngineError::network(format!("POST {}: {e}", self.endpoint)))?;
    let body = response
      .text()
      .await
      .map_err(|e| EngineError::network(format!("read upload response: {e}")))?;

    let pointer = pointer_from_reply(&body, &self.scheme_marker)?;
    tracing::info!(pointer = %pointer, "artifact uploaded");
    Ok(pointer)
  }
}

fn validate_document(document: &Value) -> Result<()> {
  if document.is_null() {
    return Err(EngineError::validation("no JSON data provided"));
  }
  Ok(())
}

/// Prefers the gateway URL; a bare cid is prefixed with `scheme_marker` so it resolves later.
pub fn pointer_from_reply(body: &str, scheme_marker: &str) -> Result<String> {
  let receipt: UploadReceipt = serde_json::from_str(body)
    .map_err(|_| EngineError::ArtifactFormat("upload reply is not valid JSON".to_string()))?;

  if !receipt.success {
    let reason = receipt.error.unwrap_or_else(|| "Upload failed".to_string());
    return Err(EngineError::ArtifactFormat(format!("upload rejected: {reason}")));
  }

  receipt
    .url
    .filter(|u| !u.is_empty())
    .or_else(|| receipt.cid.map(|cid| format!("{scheme_marker}{cid}")))
    .ok_or_else(|| EngineError::ArtifactFormat("upload reply has neither url nor cid".to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pointer::PointerResolver;

  const MARKER: &str = "ipfs://";

  #[test]
  fn successful_reply_yields_url() {
    let body = r#"{"success":true,"cid":"QmX","url":"https://gw.example/ipfs/QmX"}"#;
    assert_eq!(pointer_from_reply(body, MARKER).unwrap(), "https://gw.example/ipfs/QmX");
  }

  #[test]
  fn cid_only_reply_yields_scheme_pointer() {
    let body = r#"{"success":true,"cid":"QmX"}"#;
    assert_eq!(pointer_from_reply(body, MARKER).unwrap(), "ipfs://QmX");
  }

  #[test]
  fn cid_only_reply_uses_configured_marker_and_resolves() {
    let body = r#"{"success":true,"cid":"QmCustomMarkerArtifact"}"#;
    let pointer = pointer_from_reply(body, "ar://").unwrap();
    assert_eq!(pointer, "ar://QmCustomMarkerArtifact");

    let resolver = PointerResolver::new("https://gw.example/", "ar://");
    assert_eq!(
      resolver.resolve(&pointer),
      "https://gw.example/QmCustomMarkerArtifact"
    );
  }

  #[test]
  fn failed_reply_is_format_error() {
    let err = pointer_from_reply(r#"{"error":"Upload failed"}"#, MARKER).unwrap_err();
    assert_eq!(
      err,
      EngineError::ArtifactFormat("upload rejected: Upload failed".to_string())
    );
    assert!(matches!(
      pointer_from_reply("Bad Gateway", MARKER),
      Err(EngineError::ArtifactFormat(_))
    ));
  }

  #[tokio::test]
  async fn null_document_is_rejected_before_network() {
    let cfg = GatewayConfig {
      upload_endpoint: "http://127.0.0.1:9/upload-json".to_string(),
      ..GatewayConfig::default()
    };
    let client = UploadClient::new(&cfg).unwrap();
    let err = client.upload_json(&Value::Null).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
  }
}
