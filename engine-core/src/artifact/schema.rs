use serde_json::Value;
use std::collections::BTreeMap;

/// Typed view of the JSON a submitter pins next to a report. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactDocument {
  pub kind: Option<String>,
  pub confidence: Option<f64>,
  pub description: Option<String>,
  pub recommended_action: Option<String>,
  pub ioc: BTreeMap<String, String>,
}

impl ArtifactDocument {
  pub fn from_value(value: &Value) -> Self {
    let ioc = value
      .get("ioc")
      .and_then(Value::as_object)
      .map(|m| {
        m.iter()
          .filter_map(|(k, v)| scalar_text(v).map(|s| (k.clone(), s)))
          .collect()
      })
      .unwrap_or_default();

    Self {
      kind: text_field(value, "type"),
      confidence: declared_confidence(value),
      description: text_field(value, "description"),
      recommended_action: text_field(value, "recommended_action"),
      ioc,
    }
  }
}

// `confidence` wins over `score` whenever it is present, even if it turns out not to be numeric.
fn declared_confidence(value: &Value) -> Option<f64> {
  let raw = match value.get("confidence") {
    Some(v) if !v.is_null() => v,
    _ => value.get("score").filter(|v| !v.is_null())?,
  };

  let n = match raw {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  n.is_finite().then_some(n)
}

fn text_field(value: &Value, key: &str) -> Option<String> {
  scalar_text(value.get(key)?).filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
