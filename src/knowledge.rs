use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::agent::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    SubtaskExperience,
    TaskReflection,
}

impl KnowledgeKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            KnowledgeKind::SubtaskExperience => "subtask_experience_knowledge_base.json",
            KnowledgeKind::TaskReflection => "lifelong_learning_knowledge_base.json",
        }
    }
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn lookup(&self, kind: KnowledgeKind, key: &str) -> Result<Option<String>, AgentError>;

    /// Stores `value` unless `key` exists. Returns whether it was written.
    async fn insert_if_absent(&self, kind: KnowledgeKind, key: &str, value: &str) -> Result<bool, AgentError>;
}

/// Remembers nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NullKnowledgeStore {
    async fn lookup(&self, _kind: KnowledgeKind, _key: &str) -> Result<Option<String>, AgentError> {
        Ok(None)
    }

    async fn insert_if_absent(&self, _kind: KnowledgeKind, _key: &str, _value: &str) -> Result<bool, AgentError> {
        Ok(false)
    }
}

/// One pretty-printed JSON object per [`KnowledgeKind`] inside `dir`.
pub struct JsonKnowledgeStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonKnowledgeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, kind: KnowledgeKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    async fn load(&self, kind: KnowledgeKind) -> Result<BTreeMap<String, String>, AgentError> {
        let path = self.path(kind);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) if body.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(body) => serde_json::from_str(&body)
                .map_err(|e| AgentError::Knowledge(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AgentError::Knowledge(format!("{}: {e}", path.display()))),
        }
    }

    async fn save(&self, kind: KnowledgeKind, map: &BTreeMap<String, String>) -> Result<(), AgentError> {
        let path = self.path(kind);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Knowledge(format!("{}: {e}", self.dir.display())))?;
        let body = serde_json::to_string_pretty(map).map_err(|e| AgentError::Knowledge(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| AgentError::Knowledge(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Knowledge(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl KnowledgeStore for JsonKnowledgeStore {
    async fn lookup(&self, kind: KnowledgeKind, key: &str) -> Result<Option<String>, AgentError> {
        Ok(self.load(kind).await?.get(key).cloned())
    }

    async fn insert_if_absent(&self, kind: KnowledgeKind, key: &str, value: &str) -> Result<bool, AgentError> {
        let _guard = self.write_lock.lock().await;
        // an unreadable file is an error here, never an empty map to overwrite
        let mut map = self.load(kind).await?;
        if map.contains_key(key) {
            debug!(?kind, key, "knowledge key exists; keeping stored value");
            return Ok(false);
        }
        map.insert(key.to_string(), value.to_string());
        self.save(kind, &map).await?;
        debug!(?kind, key, "knowledge stored");
        Ok(true)
    }
}

/// Lookup that logs and swallows store errors.
pub async fn lookup_or_none(store: &dyn KnowledgeStore, kind: KnowledgeKind, key: &str) -> Option<String> {
    match store.lookup(kind, key).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, ?kind, "knowledge lookup failed");
            None
        }
    }
}
