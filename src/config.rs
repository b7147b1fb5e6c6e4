// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::capture::gate::DEFAULT_DEDUP_WINDOW_MS;
use crate::capture::{FingerprintRule, TargetRule};
use crate::delivery::{FieldTable, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::scheduler::DEFAULT_INTERVAL_MINUTES;
use crate::state::DEFAULT_STATE_PATH;

pub const ENV_CONFIG_PATH: &str = "CAPTURE_CONFIG_PATH";
pub const ENV_STATE_PATH: &str = "CAPTURE_STATE_PATH";

const BLOOMBERG_STORIES_PATH: &str = "/lineup-next/api/stories";
const REUTERS_ARTICLES_PATH: &str = "/pf/api/v3/content/fetch/articles-by-section-alias-or-id-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: i64,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            dedup_window_ms: default_dedup_window_ms(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
            sources: default_sources(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_interval_minutes: u32,
    /// Upper bound of the random delay added to each timed firing.
    pub max_jitter_secs: u64,
    /// How long a cycle waits for capture summaries after refreshing.
    pub capture_wait_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            max_jitter_secs: 300,
            capture_wait_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Bloomberg,
    Reuters,
}

/// One `[[sources]]` entry as written in the config file. Anything left out
/// comes from the preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub origin: Option<Url>,
    #[serde(default)]
    pub collector_url: Option<String>,
    #[serde(default)]
    pub refresh_urls: Option<Vec<String>>,
    #[serde(default)]
    pub target: Option<TargetRule>,
    #[serde(default)]
    pub fingerprint: Option<FingerprintRule>,
    #[serde(default)]
    pub fields: Option<FieldTable>,
}

impl SourceConfig {
    pub fn from_preset(name: &str, preset: Preset) -> Self {
        Self {
            name: name.to_string(),
            preset: Some(preset),
            source_tag: None,
            origin: None,
            collector_url: None,
            refresh_urls: None,
            target: None,
            fingerprint: None,
            fields: None,
        }
    }

    /// Merge the entry over its preset. Without a preset every part must be given.
    pub fn resolve(&self) -> Result<SourceProfile> {
        let base = self.preset.map(SourceProfile::from_preset);
        let base = base.as_ref();

        Ok(SourceProfile {
            name: self.name.clone(),
            source_tag: self.pick(&self.source_tag, base.map(|b| &b.source_tag), "source_tag")?,
            origin: self
                .origin
                .clone()
                .or_else(|| base.and_then(|b| b.origin.clone())),
            collector_url: self.pick(
                &self.collector_url,
                base.map(|b| &b.collector_url),
                "collector_url",
            )?,
            refresh_urls: self
                .refresh_urls
                .clone()
                .or_else(|| base.map(|b| b.refresh_urls.clone()))
                .unwrap_or_default(),
            target: self.pick(&self.target, base.map(|b| &b.target), "target")?,
            fingerprint: self.pick(&self.fingerprint, base.map(|b| &b.fingerprint), "fingerprint")?,
            fields: self.pick(&self.fields, base.map(|b| &b.fields), "fields")?,
        })
    }

    fn pick<T: Clone>(&self, own: &Option<T>, preset: Option<&T>, what: &str) -> Result<T> {
        own.as_ref()
            .or(preset)
            .cloned()
            .ok_or_else(|| anyhow!("source {:?}: no preset and no {what}", self.name))
    }
}

/// Fully resolved per-source settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProfile {
    pub name: String,
    pub source_tag: String,
    pub origin: Option<Url>,
    pub collector_url: String,
    pub refresh_urls: Vec<String>,
    pub target: TargetRule,
    pub fingerprint: FingerprintRule,
    pub fields: FieldTable,
}

impl SourceProfile {
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            Preset::Bloomberg => Self::bloomberg(),
            Preset::Reuters => Self::reuters(),
        }
    }

    pub fn bloomberg() -> Self {
        Self {
            name: "bloomberg".into(),
            source_tag: "bloomberg-interceptor".into(),
            origin: Url::parse("https://www.bloomberg.com").ok(),
            collector_url: "http://localhost:1123/api/capture".into(),
            refresh_urls: vec![format!(
                "https://www.bloomberg.com{BLOOMBERG_STORIES_PATH}?types=ARTICLE,FEATURE,INTERACTIVE&locale=en&page=1&limit=25"
            )],
            target: TargetRule {
                path: BLOOMBERG_STORIES_PATH.into(),
                required_params: vec!["types".into()],
                excluded_params: vec!["id".into()],
                keywords: Vec::new(),
            },
            fingerprint: FingerprintRule::QueryParams {
                params: strings(&["types", "locale", "page", "limit"]),
            },
            fields: FieldTable::bloomberg(),
        }
    }

    pub fn reuters() -> Self {
        Self {
            name: "reuters".into(),
            source_tag: "reuters-interceptor".into(),
            origin: Url::parse("https://www.reuters.com").ok(),
            collector_url: "http://localhost:1125/api/capture".into(),
            refresh_urls: vec![format!(
                "https://www.reuters.com{REUTERS_ARTICLES_PATH}?query=%7B%22offset%22%3A0%2C%22orderby%22%3A%22last_updated_date%3Adesc%22%2C%22section_id%22%3A%22%2Fmarkets%2Fcommodities%2F%22%2C%22size%22%3A20%2C%22website%22%3A%22reuters%22%7D"
            )],
            target: TargetRule {
                path: REUTERS_ARTICLES_PATH.into(),
                required_params: vec!["query".into()],
                excluded_params: Vec::new(),
                keywords: strings(&["commodities", "markets"]),
            },
            fingerprint: FingerprintRule::JsonQueryParam {
                param: "query".into(),
                fields: strings(&["section_id", "size", "orderby"]),
            },
            fields: FieldTable::reuters(),
        }
    }
}

impl CaptureConfig {
    pub fn profiles(&self) -> Result<Vec<SourceProfile>> {
        self.sources.iter().map(SourceConfig::resolve).collect()
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Ok(p) = std::env::var(ENV_STATE_PATH) {
            if !p.trim().is_empty() {
                self.state_path = PathBuf::from(p);
            }
        }
        self
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<CaptureConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading capture config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing capture config {}", path.display()))?;
    Ok(cfg.apply_env_overrides())
}

/// Load config using env var + fallbacks:
/// 1) $CAPTURE_CONFIG_PATH
/// 2) config/capture.toml
/// 3) config/capture.json
/// 4) built-in Bloomberg + Reuters presets
pub fn load_default() -> Result<CaptureConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/capture.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/capture.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(CaptureConfig::default().apply_env_overrides())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CaptureConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => serde_json::from_str(s)
            .map_err(anyhow::Error::from)
            .or_else(|_| toml::from_str(s).map_err(anyhow::Error::from))
            .map_err(|_| anyhow!("unsupported capture config format")),
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_dedup_window_ms() -> i64 {
    DEFAULT_DEDUP_WINDOW_MS
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::from_preset("bloomberg", Preset::Bloomberg),
        SourceConfig::from_preset("reuters", Preset::Reuters),
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
