//! Deterministic frozen-module manifests built from a dependency graph.

pub mod base_library;

pub use base_library::{BaseLibrary, BaseLibraryRef};

use crate::resolver::DependencyGraph;
use crate::utils::sha256_hex;
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info};

const CANONICAL_HEADER: &[u8] = b"contract-forge-frozen-v1\n";

/// Directory, relative to the build workspace, that frozen sources live in
pub const FROZEN_DIR: &str = "frozen";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Module {module} changed during the build ({path}): expected digest {expected}, found {actual}")]
pub struct StaleSourceError {
    pub module: String,
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrozenModule {
    pub name: String,
    pub digest: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub is_package: bool,
}

impl FrozenModule {
    /// `a/b.py`, or `a/b/__init__.py` for packages
    pub fn relative_path(&self) -> String {
        let base = self.name.replace('.', "/");
        if self.is_package {
            format!("{base}/__init__.py")
        } else {
            format!("{base}.py")
        }
    }
}

/// Exact input to the native build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrozenManifest {
    pub entry: String,
    pub modules: Vec<FrozenModule>,
    pub base_library: BaseLibraryRef,
}

impl FrozenManifest {
    /// Byte encoding that depends only on names, digests, contents and the
    /// base library
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            CANONICAL_HEADER.len() + self.modules.iter().map(|m| m.content.len() + 128).sum::<usize>(),
        );
        out.extend_from_slice(CANONICAL_HEADER);
        out.extend_from_slice(
            format!(
                "base {} {}\n",
                self.base_library.name, self.base_library.version
            )
            .as_bytes(),
        );
        for provided in &self.base_library.provides {
            out.extend_from_slice(format!("provides {provided}\n").as_bytes());
        }
        out.extend_from_slice(format!("entry {}\n", self.entry).as_bytes());

        for module in &self.modules {
            out.extend_from_slice(
                format!(
                    "module {} {} {} {}\n",
                    module.name,
                    u8::from(module.is_package),
                    module.digest,
                    module.content.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(&module.content);
            out.push(b'\n');
        }

        out
    }

    pub fn digest(&self) -> String {
        sha256_hex(&self.canonical_bytes())
    }

    pub fn entry_module(&self) -> Option<&FrozenModule> {
        self.modules.iter().find(|m| m.name == self.entry)
    }

    pub fn total_source_bytes(&self) -> usize {
        self.modules.iter().map(|m| m.content.len()).sum()
    }

    /// MicroPython-style `manifest.py` for the native toolchain
    pub fn render_manifest_py(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Frozen by contract-forge; entry module {}", self.entry);
        let _ = writeln!(
            out,
            "# base library {} {}",
            self.base_library.name, self.base_library.version
        );
        let _ = writeln!(out, "include(\"$(BASE_LIBRARY)/manifest.py\")");
        for module in &self.modules {
            let _ = writeln!(
                out,
                "module(\"{}\", base_path=\"{}\")",
                module.relative_path(),
                FROZEN_DIR
            );
        }
        out
    }
}

pub struct ModuleFreezer {
    base_library: BaseLibraryRef,
}

impl ModuleFreezer {
    pub fn new(base_library: &BaseLibrary) -> Self {
        Self {
            base_library: base_library.reference(),
        }
    }

    /// Freeze every node in discovery order, checking that no source changed
    /// since it was resolved.
    pub async fn freeze(&self, graph: &DependencyGraph) -> Result<FrozenManifest, StaleSourceError> {
        let mut modules = Vec::with_capacity(graph.len());

        for node in graph.modules() {
            let current = tokio::fs::read(&node.path).await;
            let actual = match &current {
                Ok(bytes) => sha256_hex(bytes),
                Err(e) => format!("<unreadable: {e}>"),
            };

            if actual != node.digest {
                return Err(StaleSourceError {
                    module: node.name.clone(),
                    path: node.path.display().to_string(),
                    expected: node.digest.clone(),
                    actual,
                });
            }

            debug!("Freezing {} ({} bytes)", node.name, node.source.len());
            modules.push(FrozenModule {
                name: node.name.clone(),
                digest: node.digest.clone(),
                content: node.source.clone(),
                is_package: node.is_package,
            });
        }

        let manifest = FrozenManifest {
            entry: graph.entry().to_string(),
            modules,
            base_library: self.base_library.clone(),
        };

        info!(
            "Froze {} modules ({} bytes) on {} {}",
            manifest.modules.len(),
            manifest.total_source_bytes(),
            manifest.base_library.name,
            manifest.base_library.version
        );

        Ok(manifest)
    }
}
