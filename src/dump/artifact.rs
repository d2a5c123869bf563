// backupengine/src/dump/artifact.rs
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::errors::{PipelineError, Result};

/// The produced dump file plus the scoped workspace it lives in.
///
/// The handle owns the temporary directory for the whole run: every
/// destination reads the same file, and the workspace is removed exactly once
/// via [`release`] after delivery has aggregated — never per destination.
/// Dropping an unreleased handle also removes the workspace, so a cancelled
/// or panicking run cannot leak it.
///
/// [`release`]: ArtifactHandle::release
#[derive(Debug)]
pub struct ArtifactHandle {
    workspace: TempDir,
    path: PathBuf,
    filename: String,
    size_bytes: u64,
}

impl ArtifactHandle {
    /// Takes ownership of the workspace and the dump file inside it.
    ///
    /// Fails with [`PipelineError::Dump`] if the file is missing or empty;
    /// the workspace is dropped (and removed) on that path.
    pub fn new(workspace: TempDir, path: PathBuf) -> Result<Self> {
        let metadata = fs::metadata(&path).map_err(|e| {
            PipelineError::Dump(format!(
                "dump file {} is not readable: {}",
                path.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(PipelineError::Dump(format!(
                "dump path {} is not a file",
                path.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(PipelineError::Dump(format!(
                "dump file {} is empty",
                path.display()
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                PipelineError::Dump(format!("dump path {} has no filename", path.display()))
            })?;

        Ok(ArtifactHandle {
            workspace,
            path,
            filename,
            size_bytes: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Removes the workspace. Consumes the handle, so a second release does
    /// not typecheck.
    pub fn release(self) -> Result<()> {
        self.workspace.close()?;
        Ok(())
    }
}
