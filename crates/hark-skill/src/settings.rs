//! Per-skill settings with snapshot-based dirty tracking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hark_protocol::{Data, SettingsStore, SkillError, SkillResult};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct SettingsInner {
    values: Data,
    saved: Data,
}

/// Settings values and the snapshot taken when they were last saved,
/// owned together so dirtiness is a plain comparison.
#[derive(Debug, Clone)]
pub struct SettingsState {
    path: PathBuf,
    inner: Arc<Mutex<SettingsInner>>,
}

impl SettingsState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: Arc::new(Mutex::new(SettingsInner::default())),
        }
    }

    /// Load from `store`; the loaded values become the saved snapshot.
    pub async fn load(path: impl Into<PathBuf>, store: &dyn SettingsStore) -> SkillResult<Self> {
        let state = Self::new(path);
        let values = store.load(&state.path).await?;
        {
            let mut inner = state.inner.lock();
            inner.saved = values.clone();
            inner.values = values;
        }
        Ok(state)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().values.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.remove(key)
    }

    /// Merge `values` over the current mapping.
    pub fn update(&self, values: Data) {
        self.inner.lock().values.extend(values);
    }

    pub fn values(&self) -> Data {
        self.inner.lock().values.clone()
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock();
        inner.values != inner.saved
    }

    /// Save unconditionally and reset the snapshot.
    pub async fn save(&self, store: &dyn SettingsStore) -> SkillResult<()> {
        let values = self.values();
        store.save(&self.path, &values).await?;
        self.inner.lock().saved = values;
        Ok(())
    }

    /// Save only when values differ from the snapshot. Returns whether a
    /// save happened. On failure the snapshot is left untouched so the next
    /// check retries.
    #[instrument(skip(self, store), fields(path = %self.path.display()))]
    pub async fn persist_if_dirty(&self, store: &dyn SettingsStore) -> SkillResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save(store).await?;
        debug!("settings persisted");
        Ok(true)
    }
}

/// Settings stored as pretty-printed JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSettingsStore;

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self, path: &Path) -> SkillResult<Data> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Data::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(values)) => Ok(values),
            Ok(_) => Err(SkillError::Settings(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
            Err(err) => Err(SkillError::Settings(format!(
                "failed parsing {}: {err}",
                path.display()
            ))),
        }
    }

    async fn save(&self, path: &Path, settings: &Data) -> SkillResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(settings)
            .map_err(|e| SkillError::Settings(e.to_string()))?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}
