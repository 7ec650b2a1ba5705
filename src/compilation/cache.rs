//! Content-addressed build cache.
//!
//! Layout under the cache directory:
//!
//! ```text
//! blobs/<sha256>        immutable WASM artifacts
//! entries/<key>.json    CacheEntry pointing at a raw and an optimized blob
//! ```
//!
//! Every file is published by renaming a fully written temp file from the
//! same directory, so a reader sees either no entry or a complete one. Blobs
//! are written before the entry that references them.

use super::error::CacheError;
use super::native::BuildFlags;
use crate::freezer::FrozenManifest;
use crate::manifest::OptimizationMode;
use crate::utils::{atomic_write, sha256_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CACHE_KEY_DOMAIN: &str = "contract-forge-cache-v1";

/// Fingerprint of every input that affects the build output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(
        manifest: &FrozenManifest,
        flags: &BuildFlags,
        toolchain_version: &str,
        optimizer_fingerprint: &str,
    ) -> Self {
        let manifest_bytes = manifest.canonical_bytes();
        let flag_bytes = flags.canonical_bytes();

        let mut hasher = Sha256::new();
        for field in [
            CACHE_KEY_DOMAIN.as_bytes(),
            manifest_bytes.as_slice(),
            flag_bytes.as_slice(),
            toolchain_version.as_bytes(),
            optimizer_fingerprint.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw and optimized output of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub raw: Vec<u8>,
    pub optimized: Vec<u8>,
    pub mode: OptimizationMode,
    pub toolchain_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub digest: String,
    pub size: u64,
}

impl BlobRef {
    fn of(data: &[u8]) -> Self {
        Self {
            digest: sha256_hex(data),
            size: data.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub raw: BlobRef,
    pub optimized: BlobRef,
    pub mode: OptimizationMode,
    pub toolchain_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub artifact: BuildArtifact,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub blobs: usize,
    pub blob_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed_entries: usize,
    pub removed_blobs: usize,
}

#[derive(Debug, Clone)]
pub struct BuildCache {
    dir: PathBuf,
}

impl BuildCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entries_dir(&self) -> PathBuf {
        self.dir.join("entries")
    }

    fn blobs_dir(&self) -> PathBuf {
        self.dir.join("blobs")
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.entries_dir().join(format!("{key}.json"))
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.blobs_dir().join(digest)
    }

    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedArtifact> {
        let path = self.entry_path(key);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache miss for {}", key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                return None;
            }
        };
        if entry.key != *key {
            warn!("Ignoring cache entry {} recorded under another key", path.display());
            return None;
        }

        let raw = self.read_blob(&entry.raw).await?;
        let optimized = self.read_blob(&entry.optimized).await?;

        info!("Cache hit for {}", key);
        Some(CachedArtifact {
            artifact: BuildArtifact {
                raw,
                optimized,
                mode: entry.mode,
                toolchain_version: entry.toolchain_version,
            },
            created_at: entry.created_at,
        })
    }

    async fn read_blob(&self, blob: &BlobRef) -> Option<Vec<u8>> {
        let path = self.blob_path(&blob.digest);
        match tokio::fs::read(&path).await {
            Ok(data) if data.len() as u64 == blob.size && sha256_hex(&data) == blob.digest => {
                Some(data)
            }
            Ok(_) => {
                warn!("Cache blob {} does not match its digest", path.display());
                None
            }
            Err(e) => {
                warn!("Cache blob {} is unavailable: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn store(
        &self,
        key: &CacheKey,
        artifact: &BuildArtifact,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            key: key.clone(),
            raw: BlobRef::of(&artifact.raw),
            optimized: BlobRef::of(&artifact.optimized),
            mode: artifact.mode,
            toolchain_version: artifact.toolchain_version.clone(),
            created_at: Utc::now(),
        };

        self.publish(&self.blob_path(&entry.raw.digest), &artifact.raw)
            .await?;
        if entry.optimized.digest != entry.raw.digest {
            self.publish(&self.blob_path(&entry.optimized.digest), &artifact.optimized)
                .await?;
        }

        let json = serde_json::to_vec_pretty(&entry)?;
        self.publish(&self.entry_path(key), &json).await?;

        debug!("Stored cache entry {}", key);
        Ok(entry)
    }

    async fn publish(&self, path: &Path, data: &[u8]) -> Result<(), CacheError> {
        atomic_write(path, data)
            .await
            .map_err(|error| CacheError::Io {
                path: path.display().to_string(),
                error,
            })
    }

    /// Remove every entry and blob
    pub async fn clear(&self) -> Result<CacheStats, CacheError> {
        let stats = self.stats()?;
        for dir in [self.entries_dir(), self.blobs_dir()] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(CacheError::Io {
                        path: dir.display().to_string(),
                        error,
                    })
                }
            }
        }
        info!("Cleared {} cache entries", stats.entries);
        Ok(stats)
    }

    /// Drop entries built by other toolchain versions, then unreferenced blobs
    pub async fn prune(&self, toolchain_version: &str) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        let mut referenced = HashSet::new();

        for path in self.files_in(&self.entries_dir())? {
            let entry = tokio::fs::read(&path)
                .await
                .ok()
                .and_then(|content| serde_json::from_slice::<CacheEntry>(&content).ok());

            match entry {
                Some(entry) if entry.toolchain_version == toolchain_version => {
                    referenced.insert(entry.raw.digest);
                    referenced.insert(entry.optimized.digest);
                }
                _ => {
                    self.remove(&path).await?;
                    report.removed_entries += 1;
                }
            }
        }

        for path in self.files_in(&self.blobs_dir())? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !referenced.contains(&name) {
                self.remove(&path).await?;
                report.removed_blobs += 1;
            }
        }

        info!(
            "Pruned {} entries and {} blobs not built with {}",
            report.removed_entries, report.removed_blobs, toolchain_version
        );
        Ok(report)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            entries: self.files_in(&self.entries_dir())?.len(),
            ..CacheStats::default()
        };
        for path in self.files_in(&self.blobs_dir())? {
            stats.blobs += 1;
            stats.blob_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(stats)
    }

    /// Published files in `dir`, skipping in-flight temp files
    fn files_in(&self, dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if entry.file_type().is_file() && !hidden {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    async fn remove(&self, path: &Path) -> Result<(), CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(CacheError::Io {
                path: path.display().to_string(),
                error,
            }),
        }
    }
}
