// ABOUTME: File service contract used by the tool dispatcher, plus a workspace-rooted local implementation.
// ABOUTME: Relative paths resolve under the workspace root; paths that escape it are refused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::ToolError;

#[async_trait]
pub trait FileService: Send + Sync {
    async fn read_to_string(&self, path: &str) -> Result<String, ToolError>;
    /// Write `content`, creating parent directories as needed.
    async fn write(&self, path: &str, content: &str) -> Result<(), ToolError>;
    async fn copy(&self, src: &str, dest: &str) -> Result<(), ToolError>;
    async fn exists(&self, path: &str) -> bool;
    /// Absolute location of `path`, for collaborators that need a real file.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError>;
}

/// Files on the local disk under a single workspace root.
#[derive(Debug, Clone)]
pub struct LocalFileService {
    root: PathBuf,
}

impl LocalFileService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Join `path` onto `root` lexically, refusing any `..` that climbs above it.
fn join_within(root: &Path, path: &str) -> Result<PathBuf, ToolError> {
    let requested = Path::new(path.trim());
    let relative = requested.strip_prefix(root).unwrap_or(requested);
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                resolved.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::OutsideWorkspace(requested.to_path_buf()));
            }
        }
    }
    if depth == 0 {
        return Err(ToolError::OutsideWorkspace(requested.to_path_buf()));
    }
    Ok(resolved)
}

fn io_error(path: &Path, source: std::io::Error) -> ToolError {
    ToolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl FileService for LocalFileService {
    async fn read_to_string(&self, path: &str) -> Result<String, ToolError> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| io_error(Path::new(path), e))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), ToolError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Path::new(path), e))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| io_error(Path::new(path), e))
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<(), ToolError> {
        let from = self.resolve(src)?;
        let to = self.resolve(dest)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Path::new(dest), e))?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map(|_| ())
            .map_err(|e| io_error(Path::new(src), e))
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(full).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        join_within(&self.root, path)
    }
}
