use mindgraph_core::{MindGraphError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination for diagnostic artifacts such as malformed LLM responses.
pub trait ArtifactSink: Send + Sync {
    fn persist(&self, kind: &str, key: &str, content: &str) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullArtifactSink;

impl ArtifactSink for NullArtifactSink {
    fn persist(&self, _kind: &str, _key: &str, _content: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: String,
    pub key: String,
    pub content: String,
}

/// Keeps artifacts in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn persist(&self, kind: &str, key: &str, content: &str) -> Result<()> {
        self.artifacts.lock().push(Artifact {
            kind: kind.to_string(),
            key: key.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

/// Writes `<dir>/<kind>/<key>.txt`.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

impl ArtifactSink for FsArtifactSink {
    fn persist(&self, kind: &str, key: &str, content: &str) -> Result<()> {
        let dir = self.dir.join(Self::sanitize(kind));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.txt", Self::sanitize(key)));
        std::fs::write(&path, content).map_err(|e| {
            MindGraphError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to write artifact {:?}: {}", path, e),
            ))
        })?;
        debug!("Wrote artifact {:?}", path);
        Ok(())
    }
}
