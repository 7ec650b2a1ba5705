use thiserror::Error;

/// Errors raised while loading or validating a project manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {error}")]
    Read { path: String, error: std::io::Error },

    #[error("Invalid manifest syntax in {path}: {reason}")]
    Syntax { path: String, reason: String },

    #[error("Invalid manifest field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid version pin for `{package}`: {reason}")]
    InvalidPin { package: String, reason: String },
}
