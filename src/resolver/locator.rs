//! Maps dotted module names onto files under the configured roots.

use super::pins::{normalize_name, parse_python_version};
use semver::Version;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Project sources
    Source,
    /// Installed third-party packages (e.g. `site-packages`)
    Package,
}

#[derive(Debug, Clone)]
pub struct SearchRoot {
    pub path: PathBuf,
    pub kind: RootKind,
}

/// An installed distribution found through its `*.dist-info` directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub name: String,
    /// Version string as declared by the distribution
    pub raw_version: Option<String>,
    #[serde(skip)]
    pub version: Option<Version>,
}

/// Where a module was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleOrigin {
    Local,
    Package { distribution: Option<Distribution> },
}

#[derive(Debug, Clone)]
pub struct LocatedModule {
    pub name: String,
    pub path: PathBuf,
    pub is_package: bool,
    pub origin: ModuleOrigin,
}

pub struct ModuleLocator {
    roots: Vec<SearchRoot>,
    /// Top-level module name -> distribution, per package root
    distributions: HashMap<PathBuf, HashMap<String, Distribution>>,
}

impl ModuleLocator {
    pub fn new(roots: Vec<SearchRoot>) -> Self {
        Self {
            roots,
            distributions: HashMap::new(),
        }
    }

    pub fn roots(&self) -> &[SearchRoot] {
        &self.roots
    }

    /// Find `name` as `root/a/b.py` or `root/a/b/__init__.py`, roots in order
    pub async fn locate(&mut self, name: &str) -> Option<LocatedModule> {
        let parts: Vec<&str> = name.split('.').collect();
        let roots = self.roots.clone();

        for root in &roots {
            let base = parts.iter().fold(root.path.clone(), |acc, p| acc.join(p));

            let module_file = base.with_extension("py");
            if is_file(&module_file).await {
                trace!("Located {} at {}", name, module_file.display());
                return Some(self.located(name, module_file, false, root).await);
            }

            let init_file = base.join("__init__.py");
            if is_file(&init_file).await {
                trace!("Located package {} at {}", name, init_file.display());
                return Some(self.located(name, init_file, true, root).await);
            }
        }

        None
    }

    /// A directory without `__init__.py` on some root
    pub async fn is_namespace_package(&self, name: &str) -> bool {
        for root in &self.roots {
            let dir = name.split('.').fold(root.path.clone(), |acc, p| acc.join(p));
            if tokio::fs::metadata(&dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    async fn located(
        &mut self,
        name: &str,
        path: PathBuf,
        is_package: bool,
        root: &SearchRoot,
    ) -> LocatedModule {
        let origin = match root.kind {
            RootKind::Source => ModuleOrigin::Local,
            RootKind::Package => {
                let top_level = name.split('.').next().unwrap_or(name);
                let distribution = self
                    .distributions_for(&root.path)
                    .await
                    .get(top_level)
                    .cloned();
                ModuleOrigin::Package { distribution }
            }
        };

        LocatedModule {
            name: name.to_string(),
            path,
            is_package,
            origin,
        }
    }

    /// Every distribution installed under the package roots
    pub async fn all_distributions(&mut self) -> Vec<(String, Distribution)> {
        let package_roots: Vec<PathBuf> = self
            .roots
            .iter()
            .filter(|r| r.kind == RootKind::Package)
            .map(|r| r.path.clone())
            .collect();

        let mut all = Vec::new();
        for root in package_roots {
            let mut entries: Vec<_> = self
                .distributions_for(&root)
                .await
                .iter()
                .map(|(module, dist)| (module.clone(), dist.clone()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            all.extend(entries);
        }
        all
    }

    async fn distributions_for(&mut self, root: &Path) -> &HashMap<String, Distribution> {
        if !self.distributions.contains_key(root) {
            let index = scan_distributions(root).await;
            debug!(
                "Indexed {} installed modules under {}",
                index.len(),
                root.display()
            );
            self.distributions.insert(root.to_path_buf(), index);
        }
        &self.distributions[root]
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn scan_distributions(root: &Path) -> HashMap<String, Distribution> {
    let mut index = HashMap::new();

    let Ok(mut entries) = tokio::fs::read_dir(root).await else {
        return index;
    };

    let mut dist_dirs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stem) = file_name.strip_suffix(".dist-info") {
            dist_dirs.push((stem.to_string(), entry.path()));
        }
    }
    // Stable precedence when two dist-info directories claim one module
    dist_dirs.sort();

    for (stem, dir) in dist_dirs {
        let (name, dir_version) = match stem.split_once('-') {
            Some((name, version)) => (name.to_string(), Some(version.to_string())),
            None => (stem.clone(), None),
        };

        let raw_version = match dir_version {
            Some(version) => Some(version),
            None => read_metadata_version(&dir).await,
        };
        let version = raw_version.as_deref().and_then(parse_python_version);

        let distribution = Distribution {
            name: name.clone(),
            raw_version,
            version,
        };

        let top_level = match tokio::fs::read_to_string(dir.join("top_level.txt")).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => vec![normalize_name(&name)],
        };

        for module in top_level {
            index.entry(module).or_insert_with(|| distribution.clone());
        }
    }

    index
}

async fn read_metadata_version(dist_info: &Path) -> Option<String> {
    let metadata = tokio::fs::read_to_string(dist_info.join("METADATA"))
        .await
        .ok()?;
    metadata
        .lines()
        .take_while(|l| !l.is_empty())
        .find_map(|l| l.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
}
