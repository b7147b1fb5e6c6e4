// src/delivery/normalize.rs
//! Item location + field mapping for captured list payloads.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One output field and where to find it on a raw item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Candidate keys in priority order; the first non-empty one wins.
    pub from: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// Prepended to relative values (`/x` -> `https://site/x`).
    #[serde(default)]
    pub url_prefix: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str, from: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            from: from.iter().map(|s| s.to_string()).collect(),
            required: false,
            url_prefix: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_url_prefix(mut self, prefix: &str) -> Self {
        self.url_prefix = Some(prefix.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTable {
    /// Dotted paths to the item array, tried in order. `""` is the top level.
    pub item_paths: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

/// A filtered item, ready to be posted to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(pub Map<String, Value>);

impl NormalizedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl FieldTable {
    /// Bloomberg `lineup-next/api/stories` list payloads.
    pub fn bloomberg() -> Self {
        Self {
            item_paths: paths(&["", "stories", "items", "data", "results", "articles"]),
            fields: vec![
                FieldSpec::new("publishedAt", &["publishedAt", "published_at", "date"]),
                FieldSpec::new("brand", &["brand", "source"]),
                FieldSpec::new("headline", &["headline", "title"]).required(),
            ],
        }
    }

    /// Reuters `articles-by-section-alias-or-id` payloads (`{result: {articles}}`).
    pub fn reuters() -> Self {
        Self {
            item_paths: paths(&["", "result.articles", "articles", "items", "data", "results"]),
            fields: vec![
                FieldSpec::new("title", &["title", "web", "headline", "native"]).required(),
                FieldSpec::new(
                    "published_time",
                    &["published_time", "publishedAt", "updated_time"],
                )
                .required(),
                FieldSpec::new("url", &["canonical_url", "url"])
                    .with_url_prefix("https://www.reuters.com"),
            ],
        }
    }

    /// First candidate path holding a non-empty array.
    pub fn locate_items<'a>(&self, raw: &'a Value) -> &'a [Value] {
        for p in &self.item_paths {
            if let Some(Value::Array(items)) = resolve_path(raw, p) {
                if !items.is_empty() {
                    return items;
                }
            }
        }
        &[]
    }

    pub fn normalize(&self, raw: &Value) -> Vec<NormalizedRecord> {
        let items = self.locate_items(raw);
        let out: Vec<NormalizedRecord> = items.iter().filter_map(|it| self.map_item(it)).collect();
        tracing::debug!(target: "delivery", located = items.len(), kept = out.len(), "normalized payload");
        out
    }

    fn map_item(&self, item: &Value) -> Option<NormalizedRecord> {
        let obj = item.as_object()?;
        let mut rec = Map::new();
        for f in &self.fields {
            let v = f
                .from
                .iter()
                .filter_map(|k| obj.get(k))
                .find(|v| is_present(v))
                .map(|v| clean_value(v, f.url_prefix.as_deref()));
            match v {
                Some(v) => {
                    rec.insert(f.name.clone(), v);
                }
                None if f.required => return None,
                None => {
                    rec.insert(f.name.clone(), Value::Null);
                }
            }
        }
        Some(NormalizedRecord(rec))
    }
}

fn paths(p: &[&str]) -> Vec<String> {
    p.iter().map(|s| s.to_string()).collect()
}

fn resolve_path<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(raw);
    }
    path.split('.').try_fold(raw, |cur, seg| cur.get(seg))
}

/// Missing, null, false and empty strings count as absent.
fn is_present(v: &Value) -> bool {
    match v {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn clean_value(v: &Value, url_prefix: Option<&str>) -> Value {
    let Value::String(s) = v else {
        return v.clone();
    };
    match url_prefix {
        Some(prefix) => {
            let s = s.trim();
            if s.starts_with("http") {
                Value::String(s.to_string())
            } else {
                Value::String(format!("{prefix}{s}"))
            }
        }
        None => Value::String(clean_text(s)),
    }
}

/// Decode HTML entities, collapse whitespace, trim.
pub fn clean_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&decoded, " ").trim().to_string()
}
