// src/state.rs
//! Persistent controller state: scheduler settings, last capture, task history.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::bridge::CaptureSummary;

pub const TASK_RECORD_CAP: usize = 100;
pub const DEFAULT_STATE_PATH: &str = "state/capture_state.json";

/// One scheduled capture cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub time: DateTime<Utc>,
    pub success: bool,
    pub item_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub scheduler_enabled: bool,
    #[serde(default)]
    pub scheduler_interval: Option<u32>,
    #[serde(default)]
    pub scheduler_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduler_stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_auto_refresh_time: Option<DateTime<Utc>>,
    /// Newest first, at most [`TASK_RECORD_CAP`].
    #[serde(default)]
    pub task_records: Vec<TaskRecord>,
    #[serde(default)]
    pub last_capture: Option<CaptureSummary>,
}

impl PersistedState {
    /// Prepend `rec`; drop the oldest entries beyond the cap.
    pub fn push_task_record(&mut self, rec: TaskRecord) {
        self.task_records.insert(0, rec);
        self.task_records.truncate(TASK_RECORD_CAP);
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<PersistedState>;
    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Rename an unparsable file to `<name>.corrupt-<unix ms>` so the next write
/// does not replace it.
pub(crate) async fn set_aside_corrupt(path: &Path) -> Result<PathBuf> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().timestamp_millis()));
    let aside = path.with_file_name(name);
    fs::rename(path, &aside)
        .await
        .with_context(|| format!("moving {} aside", path.display()))?;
    Ok(aside)
}

/// JSON file on disk. A missing file loads as the default state; an
/// unparsable one is moved aside first.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<PersistedState> {
        match fs::read_to_string(&self.path).await {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(st) => Ok(st),
                Err(e) => {
                    let aside = set_aside_corrupt(&self.path).await?;
                    tracing::warn!(
                        path = %self.path.display(),
                        moved_to = %aside.display(),
                        "corrupt state file, starting fresh: {e:#}"
                    );
                    Ok(PersistedState::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(e).with_context(|| format!("reading state from {}", self.path.display())),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(state).context("encoding state")?;
        fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing state to {}", self.path.display()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: parking_lot::Mutex<PersistedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PersistedState {
        self.inner.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<PersistedState> {
        Ok(self.inner.lock().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.inner.lock() = state.clone();
        Ok(())
    }
}

/// Serializes load-modify-save cycles so concurrent writers do not lose updates.
#[derive(Clone)]
pub struct StateHandle {
    store: Arc<dyn StateStore>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl StateHandle {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub async fn load(&self) -> Result<PersistedState> {
        let _g = self.lock.lock().await;
        self.store.load().await
    }

    pub async fn update<F>(&self, f: F) -> Result<PersistedState>
    where
        F: FnOnce(&mut PersistedState) + Send,
    {
        let _g = self.lock.lock().await;
        let mut st = self.store.load().await?;
        f(&mut st);
        self.store.save(&st).await?;
        Ok(st)
    }
}
