//! Static dependency resolution from the entry module.

pub mod error;
pub mod graph;
pub mod locator;
pub mod pins;

pub use error::ResolutionError;
pub use graph::{DependencyGraph, ModuleNode};
pub use locator::{Distribution, LocatedModule, ModuleLocator, ModuleOrigin, RootKind, SearchRoot};
pub use pins::VersionPin;

use crate::freezer::BaseLibrary;
use crate::manifest::ProjectManifest;
use crate::python::{ImportStatement, ParsedModule};
use crate::utils::sha256_hex;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// A non-fatal finding made during resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    pub message: String,
    pub module: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub graph: DependencyGraph,
    pub warnings: Vec<ResolutionWarning>,
}

pub struct DependencyResolver {
    project_root: PathBuf,
    manifest: ProjectManifest,
    base_library: BaseLibrary,
    pins: Vec<VersionPin>,
}

struct Pending {
    name: String,
    path: PathBuf,
    is_package: bool,
    origin: ModuleOrigin,
}

struct Candidate {
    name: String,
    /// Whether failing to locate this name is an error
    required: bool,
    line: usize,
}

#[derive(Default)]
struct Traversal {
    discovered: HashSet<String>,
    queue: VecDeque<Pending>,
    nodes: Vec<ModuleNode>,
    warnings: Vec<ResolutionWarning>,
    checked_pins: HashSet<usize>,
}

impl DependencyResolver {
    pub fn new(
        project_root: impl Into<PathBuf>,
        manifest: &ProjectManifest,
        base_library: &BaseLibrary,
    ) -> Result<Self, ResolutionError> {
        Ok(Self {
            project_root: project_root.into(),
            pins: manifest.version_pins()?,
            manifest: manifest.clone(),
            base_library: base_library.clone(),
        })
    }

    pub async fn resolve(&self) -> Result<Resolution, ResolutionError> {
        let root = tokio::fs::canonicalize(&self.project_root)
            .await
            .map_err(|error| ResolutionError::Io {
                path: self.project_root.display().to_string(),
                error,
            })?;

        let entry_path = normalize_path(&root.join(&self.manifest.entry));
        let entry_exists = tokio::fs::metadata(&entry_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !entry_exists {
            return Err(ResolutionError::EntryNotFound {
                path: entry_path.display().to_string(),
            });
        }

        let source_roots: Vec<PathBuf> = self
            .manifest
            .source_roots
            .iter()
            .map(|r| normalize_path(&root.join(r)))
            .collect();
        let (entry_name, entry_is_package) = entry_module_name(&entry_path, &source_roots)?;

        let mut roots: Vec<SearchRoot> = source_roots
            .into_iter()
            .map(|path| SearchRoot {
                path,
                kind: RootKind::Source,
            })
            .collect();
        roots.extend(self.manifest.package_roots.iter().map(|r| SearchRoot {
            path: normalize_path(&root.join(r)),
            kind: RootKind::Package,
        }));
        let mut locator = ModuleLocator::new(roots);

        debug!("Resolving dependencies from entry module {}", entry_name);

        let mut state = Traversal::default();
        state.discovered.insert(entry_name.clone());
        state.queue.push_back(Pending {
            name: entry_name.clone(),
            path: entry_path,
            is_package: entry_is_package,
            origin: ModuleOrigin::Local,
        });

        while let Some(pending) = state.queue.pop_front() {
            let node = self.visit(pending, &mut locator, &mut state).await?;
            state.nodes.push(node);
        }

        self.check_unreachable_pins(&mut locator, &mut state).await;

        let graph = DependencyGraph::from_nodes(entry_name, state.nodes)
            .map_err(ResolutionError::InconsistentGraph)?;

        info!(
            "Resolved {} modules ({} imports) from {}",
            graph.len(),
            graph.edge_count(),
            graph.entry()
        );

        Ok(Resolution {
            graph,
            warnings: state.warnings,
        })
    }

    async fn visit(
        &self,
        pending: Pending,
        locator: &mut ModuleLocator,
        state: &mut Traversal,
    ) -> Result<ModuleNode, ResolutionError> {
        let path_display = pending.path.display().to_string();

        let bytes = tokio::fs::read(&pending.path)
            .await
            .map_err(|error| ResolutionError::Io {
                path: path_display.clone(),
                error,
            })?;

        let source = std::str::from_utf8(&bytes).map_err(|_| ResolutionError::InvalidEncoding {
            module: pending.name.clone(),
            path: path_display.clone(),
        })?;

        let parsed = ParsedModule::parse(source).map_err(|e| ResolutionError::Syntax {
            module: pending.name.clone(),
            path: path_display.clone(),
            line: e.line,
            reason: e.reason,
        })?;

        let mut imports = BTreeSet::new();
        let mut excluded_imports = BTreeSet::new();

        for statement in &parsed.imports {
            for candidate in self.candidates(&pending, statement)? {
                if self.is_excluded(&candidate.name) {
                    excluded_imports.insert(candidate.name);
                    continue;
                }
                if candidate.name == pending.name {
                    continue;
                }
                if state.discovered.contains(&candidate.name) {
                    imports.insert(candidate.name);
                    continue;
                }

                match locator.locate(&candidate.name).await {
                    Some(located) => {
                        self.check_pins(&located, &pending.name, state)?;
                        debug!("{} imports {}", pending.name, located.name);
                        state.discovered.insert(located.name.clone());
                        imports.insert(located.name.clone());
                        state.queue.push_back(Pending {
                            name: located.name,
                            path: located.path,
                            is_package: located.is_package,
                            origin: located.origin,
                        });
                    }
                    None if !candidate.required => {}
                    None if locator.is_namespace_package(&candidate.name).await => {}
                    None => {
                        return Err(ResolutionError::UnresolvedImport {
                            importer: pending.name.clone(),
                            name: candidate.name,
                            path: path_display,
                            line: candidate.line,
                        });
                    }
                }
            }
        }

        Ok(ModuleNode {
            digest: sha256_hex(&bytes),
            source: bytes,
            name: pending.name,
            path: pending.path,
            is_package: pending.is_package,
            origin: pending.origin,
            imports,
            excluded_imports,
            discovery_index: state.nodes.len(),
        })
    }

    /// Expand one import statement into the module names it may load
    fn candidates(
        &self,
        importer: &Pending,
        statement: &ImportStatement,
    ) -> Result<Vec<Candidate>, ResolutionError> {
        let mut candidates = Vec::new();

        match statement {
            ImportStatement::Module { line, name } => {
                push_with_prefixes(&mut candidates, name, *line);
            }
            ImportStatement::From {
                line,
                level,
                module,
                names,
            } => {
                let base = if *level == 0 {
                    module.clone().unwrap_or_default()
                } else {
                    let package = relative_package(importer, *level).ok_or_else(|| {
                        ResolutionError::RelativeImportBeyondTopLevel {
                            importer: importer.name.clone(),
                            line: *line,
                        }
                    })?;
                    match module {
                        Some(module) => format!("{package}.{module}"),
                        None => package,
                    }
                };

                push_with_prefixes(&mut candidates, &base, *line);
                candidates.extend(names.iter().filter(|n| n.as_str() != "*").map(|n| {
                    Candidate {
                        name: format!("{base}.{n}"),
                        required: false,
                        line: *line,
                    }
                }));
            }
        }

        Ok(candidates)
    }

    fn is_excluded(&self, name: &str) -> bool {
        let root = name.split('.').next().unwrap_or(name);
        self.manifest.is_excluded(root) || self.base_library.provides(name)
    }

    fn check_pins(
        &self,
        located: &LocatedModule,
        importer: &str,
        state: &mut Traversal,
    ) -> Result<(), ResolutionError> {
        let ModuleOrigin::Package { distribution } = &located.origin else {
            return Ok(());
        };

        let module_root = located.name.split('.').next().unwrap_or(&located.name);
        let dist_name = distribution.as_ref().map_or(module_root, |d| d.name.as_str());

        for (i, pin) in self.pins.iter().enumerate() {
            if !pin.applies_to(dist_name, module_root) || !state.checked_pins.insert(i) {
                continue;
            }

            let version = distribution.as_ref().and_then(|d| d.version.as_ref());
            match version {
                Some(version) if pin.matches(version) => {
                    debug!(
                        "Package {} {} satisfies pin `{}`",
                        dist_name, version, pin.constraint
                    );
                }
                Some(version) => {
                    let found = distribution
                        .as_ref()
                        .and_then(|d| d.raw_version.clone())
                        .unwrap_or_else(|| version.to_string());
                    return Err(ResolutionError::VersionMismatch {
                        package: pin.package.clone(),
                        constraint: pin.constraint.clone(),
                        found,
                        importer: importer.to_string(),
                    });
                }
                None => {
                    let message = format!(
                        "cannot determine the installed version of pinned package {}; pin `{}` was not checked",
                        pin.package, pin.constraint
                    );
                    warn!("{}", message);
                    state.warnings.push(ResolutionWarning {
                        message,
                        module: Some(located.name.clone()),
                    });
                }
            }
        }

        Ok(())
    }

    /// Pins on packages the traversal never reached only produce warnings
    async fn check_unreachable_pins(&self, locator: &mut ModuleLocator, state: &mut Traversal) {
        let unchecked: Vec<&VersionPin> = self
            .pins
            .iter()
            .enumerate()
            .filter(|(i, _)| !state.checked_pins.contains(i))
            .map(|(_, pin)| pin)
            .collect();
        if unchecked.is_empty() {
            return;
        }

        let installed = locator.all_distributions().await;
        for pin in unchecked {
            let found = installed
                .iter()
                .find(|(module, dist)| pin.applies_to(&dist.name, module));

            match found.and_then(|(_, dist)| dist.version.as_ref().map(|v| (dist, v))) {
                Some((dist, version)) if !pin.matches(version) => {
                    let message = format!(
                        "pinned package {} {} does not satisfy `{}` but is not reachable from the entry module",
                        dist.name,
                        dist.raw_version.as_deref().unwrap_or("?"),
                        pin.constraint
                    );
                    warn!("{}", message);
                    state.warnings.push(ResolutionWarning {
                        message,
                        module: None,
                    });
                }
                _ => debug!("Pin on {} is not used by any reachable module", pin.package),
            }
        }
    }
}

/// `a.b.c` yields optional `a`, `a.b` and required `a.b.c`
fn push_with_prefixes(candidates: &mut Vec<Candidate>, name: &str, line: usize) {
    let parts: Vec<&str> = name.split('.').collect();
    for i in 1..=parts.len() {
        candidates.push(Candidate {
            name: parts[..i].join("."),
            required: i == parts.len(),
            line,
        });
    }
}

/// Package a relative import of `level` dots refers to
fn relative_package(importer: &Pending, level: usize) -> Option<String> {
    let mut parts: Vec<&str> = importer.name.split('.').collect();
    if !importer.is_package {
        parts.pop();
    }
    if level > parts.len() {
        return None;
    }
    parts.truncate(parts.len() + 1 - level);
    Some(parts.join("."))
}

/// Dotted name of the entry file under the first source root containing it
fn entry_module_name(
    entry_path: &Path,
    source_roots: &[PathBuf],
) -> Result<(String, bool), ResolutionError> {
    for root in source_roots {
        let Ok(relative) = entry_path.strip_prefix(root) else {
            continue;
        };

        let mut parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some(file) = parts.pop() else {
            continue;
        };
        let stem = file.strip_suffix(".py").unwrap_or(&file);

        let is_package = stem == "__init__";
        if !is_package {
            parts.push(stem.to_string());
        }
        if parts.is_empty() {
            continue;
        }
        return Ok((parts.join("."), is_package));
    }

    Err(ResolutionError::EntryOutsideSourceRoots {
        entry: entry_path.display().to_string(),
        roots: source_roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Lexically resolve `.` and `..` components
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
