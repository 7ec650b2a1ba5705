use super::diagnostics::{Diagnostic, Stage};
use crate::abi::AbiError;
use crate::compilation::{CacheError, NativeBuildError, OptimizationError};
use crate::freezer::StaleSourceError;
use crate::manifest::ManifestError;
use crate::resolver::ResolutionError;
use std::fmt;
use thiserror::Error;

/// Any error that halts a compile
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    StaleSource(#[from] StaleSourceError),

    #[error(transparent)]
    NativeBuild(#[from] NativeBuildError),

    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error("{module}: {source}")]
    Abi { module: String, source: AbiError },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("ABI of {module} was read from digest {abi_digest} but the frozen entry has digest {frozen_digest}")]
    StaleAbi {
        module: String,
        abi_digest: String,
        frozen_digest: String,
    },

    #[error("Failed to write {path}: {error}")]
    Emit {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("{stage} task did not complete: {reason}")]
    Task { stage: Stage, reason: String },
}

impl CompileError {
    pub fn stage(&self) -> Stage {
        match self {
            CompileError::Manifest(_) => Stage::Manifest,
            CompileError::Resolution(ResolutionError::Manifest(_)) => Stage::Manifest,
            CompileError::Resolution(_) => Stage::Resolve,
            CompileError::StaleSource(_) => Stage::Freeze,
            CompileError::NativeBuild(_) => Stage::Build,
            CompileError::Optimization(_) => Stage::Optimize,
            CompileError::Abi { .. } | CompileError::StaleAbi { .. } => Stage::Abi,
            CompileError::Cache(_) => Stage::Cache,
            CompileError::Emit { .. } => Stage::Emit,
            CompileError::Task { stage, .. } => *stage,
        }
    }

    pub fn location(&self) -> Option<(String, Option<usize>)> {
        match self {
            CompileError::Resolution(error) => error.location(),
            CompileError::StaleSource(error) => Some((error.module.clone(), None)),
            CompileError::Abi { module, source } => Some((module.clone(), source.line())),
            CompileError::StaleAbi { module, .. } => Some((module.clone(), None)),
            _ => None,
        }
    }
}

/// Every diagnostic collected by a failed compile
#[derive(Debug, Clone)]
pub struct BuildFailure {
    /// Stage of the first error
    pub stage: Stage,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildFailure {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut errors = self.errors();
        match errors.next() {
            Some(first) => write!(f, "Build failed during {}: {}", self.stage, first.message)?,
            None => write!(f, "Build failed during {}", self.stage)?,
        }
        let more = errors.count();
        if more > 0 {
            write!(f, " (and {more} more error{})", if more == 1 { "" } else { "s" })?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        let error = CompileError::from(NativeBuildError::MissingOutput {
            expected_path: "build/contract.wasm".to_string(),
        });
        assert_eq!(error.stage(), Stage::Build);

        let error = CompileError::Abi {
            module: "contract".to_string(),
            source: AbiError::DuplicateInit {
                first: "a".to_string(),
                second: "b".to_string(),
                line: 9,
            },
        };
        assert_eq!(error.stage(), Stage::Abi);
        assert_eq!(error.location(), Some(("contract".to_string(), Some(9))));

        let error = CompileError::from(ResolutionError::from(ManifestError::InvalidPin {
            package: "x".to_string(),
            reason: "bad".to_string(),
        }));
        assert_eq!(error.stage(), Stage::Manifest);
    }

    #[test]
    fn test_failure_summary_counts_errors() {
        let failure = BuildFailure {
            stage: Stage::Build,
            diagnostics: vec![
                Diagnostic::warning(Stage::Resolve, "unused pin"),
                Diagnostic::error(Stage::Build, "toolchain exited with 2"),
                Diagnostic::error(Stage::Abi, "duplicate init"),
            ],
        };
        assert_eq!(
            failure.to_string(),
            "Build failed during build: toolchain exited with 2 (and 1 more error)"
        );
        assert_eq!(failure.warnings().count(), 1);
    }
}
