// src/capture/fingerprint.rs
//! Fingerprint derivation: which query parameters make two list requests "the same".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::types::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FingerprintRule {
    /// Join the values of plain query parameters, e.g. `types`, `locale`, `page`, `limit`.
    QueryParams { params: Vec<String> },
    /// One parameter carries a JSON object (Reuters `query={...}`); join selected fields.
    JsonQueryParam { param: String, fields: Vec<String> },
}

impl FingerprintRule {
    /// Never fails: anything that cannot be parsed falls back to the raw URL.
    pub fn fingerprint(&self, raw_url: &str, base: Option<&Url>) -> Fingerprint {
        let Some(url) = parse_with_base(raw_url, base) else {
            return Fingerprint::new(raw_url);
        };

        let key = match self {
            FingerprintRule::QueryParams { params } => from_plain_params(&url, params),
            FingerprintRule::JsonQueryParam { param, fields } => {
                from_json_param(&url, param, fields)
            }
        };

        Fingerprint::new(key.unwrap_or_else(|| raw_url.to_string()))
    }
}

/// Absolute URLs parse directly; relative ones are resolved against `base`.
pub(crate) fn parse_with_base(raw: &str, base: Option<&Url>) -> Option<Url> {
    Url::options().base_url(base).parse(raw).ok()
}

pub(crate) fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn from_plain_params(url: &Url, params: &[String]) -> Option<String> {
    let values: Vec<Option<String>> = params.iter().map(|p| query_value(url, p)).collect();
    if values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect::<Vec<_>>()
            .join("_"),
    )
}

fn from_json_param(url: &Url, param: &str, fields: &[String]) -> Option<String> {
    let raw = query_value(url, param)?;
    let obj: Value = serde_json::from_str(&raw).ok()?;
    let obj = obj.as_object()?;
    Some(
        fields
            .iter()
            .map(|f| match obj.get(f) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("_"),
    )
}
