use crate::config::GatewayConfig;

const MIN_BARE_CID_LEN: usize = 30;

/// Turns a storage pointer into something an HTTP client can GET. Pure string transform.
#[derive(Debug, Clone)]
pub struct PointerResolver {
  gateway_base: String,
  scheme_marker: String,
}

impl PointerResolver {
  pub fn new(gateway_base: impl Into<String>, scheme_marker: impl Into<String>) -> Self {
    Self {
      gateway_base: gateway_base.into(),
      scheme_marker: scheme_marker.into(),
    }
  }

  pub fn from_config(cfg: &GatewayConfig) -> Self {
    Self::new(cfg.base_url.clone(), cfg.scheme_marker.clone())
  }

  pub fn resolve(&self, pointer: &str) -> String {
    if pointer.is_empty() {
      return String::new();
    }

    if pointer.starts_with("http://") || pointer.starts_with("https://") {
      return pointer.to_string();
    }

    if !self.scheme_marker.is_empty() {
      if let Some(rest) = pointer.strip_prefix(self.scheme_marker.as_str()) {
        return format!("{}{}", self.gateway_base, rest);
      }
    }

    if looks_like_bare_cid(pointer) {
      return format!("{}{}", self.gateway_base, pointer);
    }

    pointer.to_string()
  }
}

fn looks_like_bare_cid(s: &str) -> bool {
  s.len() >= MIN_BARE_CID_LEN && s.chars().all(|c| c.is_ascii_alphanumeric())
}
