use crate::pipeline::AnalysisResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const LOG_TARGET: &str = "store";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait ResultStore: Send + Sync {
    fn save<'a>(&'a self, result: &'a AnalysisResult) -> BoxFuture<'a, Result<(), StoreError>>;

    /// `Ok(None)` when nothing is stored under `session_id`.
    fn get(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<AnalysisResult>, StoreError>>;

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    results: Arc<RwLock<HashMap<Uuid, AnalysisResult>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

impl ResultStore for MemoryStore {
    fn save<'a>(&'a self, result: &'a AnalysisResult) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.results
                .write()
                .await
                .insert(result.session_id, result.clone());
            Ok(())
        }
        .boxed()
    }

    fn get(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<AnalysisResult>, StoreError>> {
        async move { Ok(self.results.read().await.get(&session_id).cloned()) }.boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        async move { Ok(()) }.boxed()
    }
}

/// One pretty-printed JSON document per session, named `<session-id>.json`.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl ResultStore for JsonFileStore {
    fn save<'a>(&'a self, result: &'a AnalysisResult) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let json = serde_json::to_vec_pretty(result)?;

            // write then rename so readers never see a partial document
            let path = self.path_for(result.session_id);
            let partial = path.with_extension("json.partial");
            tokio::fs::write(&partial, &json).await?;
            tokio::fs::rename(&partial, &path).await?;

            tracing::debug!(target: LOG_TARGET, path = %path.display(), "result saved");
            Ok(())
        }
        .boxed()
    }

    fn get(&self, session_id: Uuid) -> BoxFuture<'_, Result<Option<AnalysisResult>, StoreError>> {
        async move {
            let bytes = match tokio::fs::read(self.path_for(session_id)).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Ok(Some(serde_json::from_slice(&bytes)?))
        }
        .boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let meta = tokio::fs::metadata(&self.dir).await?;
            if meta.permissions().readonly() {
                return Err(StoreError::Unavailable(format!(
                    "{} is read-only",
                    self.dir.display()
                )));
            }
            Ok(())
        }
        .boxed()
    }
}
