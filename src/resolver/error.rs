use crate::manifest::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Entry module not found: {path}")]
    EntryNotFound { path: String },

    #[error("Entry {entry} is not inside any source root ({roots})")]
    EntryOutsideSourceRoots { entry: String, roots: String },

    #[error("Cannot resolve import `{name}` in module {importer} ({path}:{line})")]
    UnresolvedImport {
        importer: String,
        name: String,
        path: String,
        line: usize,
    },

    #[error("Relative import in module {importer} at line {line} goes beyond the top-level package")]
    RelativeImportBeyondTopLevel { importer: String, line: usize },

    #[error("Package {package} {found} does not satisfy pin `{constraint}` (imported by {importer})")]
    VersionMismatch {
        package: String,
        constraint: String,
        found: String,
        importer: String,
    },

    #[error("Syntax error in module {module} ({path}:{line}): {reason}")]
    Syntax {
        module: String,
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Module {module} ({path}) is not valid UTF-8")]
    InvalidEncoding { module: String, path: String },

    #[error("Failed to read {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Inconsistent dependency graph: {0}")]
    InconsistentGraph(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl ResolutionError {
    /// Module and line the error points at, when it has one
    pub fn location(&self) -> Option<(String, Option<usize>)> {
        match self {
            ResolutionError::UnresolvedImport { importer, line, .. }
            | ResolutionError::RelativeImportBeyondTopLevel { importer, line } => {
                Some((importer.clone(), Some(*line)))
            }
            ResolutionError::VersionMismatch { importer, .. } => Some((importer.clone(), None)),
            ResolutionError::Syntax { module, line, .. } => Some((module.clone(), Some(*line))),
            ResolutionError::InvalidEncoding { module, .. } => Some((module.clone(), None)),
            _ => None,
        }
    }
}
