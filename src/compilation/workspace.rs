use super::error::NativeBuildError;
use crate::freezer::{FrozenManifest, FROZEN_DIR};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Per-build scratch directory holding the materialized frozen manifest.
/// The directory is removed when the workspace is dropped.
#[derive(Debug)]
pub struct BuildWorkspace {
    dir: TempDir,
}

impl BuildWorkspace {
    pub async fn create(temp_root: &Path, manifest: &FrozenManifest) -> Result<Self, NativeBuildError> {
        let workspace_error = |path: &Path, e: std::io::Error| NativeBuildError::Workspace {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(temp_root)
            .await
            .map_err(|e| workspace_error(temp_root, e))?;

        let dir = tempfile::Builder::new()
            .prefix("contract-forge-")
            .tempdir_in(temp_root)
            .map_err(|e| workspace_error(temp_root, e))?;
        let workspace = Self { dir };

        for module in &manifest.modules {
            let path = workspace.frozen_dir().join(module.relative_path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| workspace_error(parent, e))?;
            }
            tokio::fs::write(&path, &module.content)
                .await
                .map_err(|e| workspace_error(&path, e))?;
        }

        let manifest_path = workspace.manifest_path();
        tokio::fs::write(&manifest_path, manifest.render_manifest_py())
            .await
            .map_err(|e| workspace_error(&manifest_path, e))?;

        let build_dir = workspace.path().join("build");
        tokio::fs::create_dir_all(&build_dir)
            .await
            .map_err(|e| workspace_error(&build_dir, e))?;

        debug!(
            "Materialized {} frozen modules in {}",
            manifest.modules.len(),
            workspace.path().display()
        );
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn frozen_dir(&self) -> PathBuf {
        self.path().join(FROZEN_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().join("manifest.py")
    }

    /// Where the toolchain must write the raw WASM
    pub fn output_path(&self) -> PathBuf {
        self.path().join("build").join("contract.wasm")
    }
}
