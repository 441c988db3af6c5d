//! Delivery sinks for finished artifacts

use crate::error::Result;
use crate::processor::Artifact;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Env var overriding the default output directory
pub const OUTPUT_DIR_ENV: &str = "PAGECAST_OUTPUT_DIR";

/// Where finished documents go
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Persist `artifact`; returns a user-facing location when there is one
    async fn deliver(&self, artifact: Artifact) -> Result<Option<String>>;
}

/// Writes each artifact as a file under a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Sink writing into `dir` (created on first delivery)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Sink honouring `PAGECAST_OUTPUT_DIR`, else the current directory
    pub fn from_env() -> Self {
        let dir = std::env::var_os(OUTPUT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir)
    }

    /// Target directory
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

/// `name` with `_<n>` inserted before the extension; `n == 1` keeps it as is
fn numbered(name: &str, n: u32) -> String {
    if n <= 1 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, n, ext),
        None => format!("{}_{}", name, n),
    }
}

#[async_trait]
impl DeliverySink for FileSink {
    /// Never overwrites: a taken name gets a numeric suffix
    async fn deliver(&self, artifact: Artifact) -> Result<Option<String>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut n = 1;
        let (path, mut file) = loop {
            let path = self.dir.join(numbered(&artifact.filename, n));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&artifact.bytes).await?;
        file.flush().await?;

        info!(
            path = %path.display(),
            pages = artifact.page_count,
            "Document written"
        );
        Ok(Some(path.display().to_string()))
    }
}

/// Keeps artifacts in memory; used by tests and embedders
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    delivered: Arc<Mutex<Vec<Artifact>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn delivered(&self) -> Vec<Artifact> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl DeliverySink for MemorySink {
    async fn deliver(&self, artifact: Artifact) -> Result<Option<String>> {
        let name = artifact.filename.clone();
        self.delivered.lock().push(artifact);
        Ok(Some(name))
    }
}
