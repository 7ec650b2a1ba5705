use thiserror::Error;

#[derive(Error, Debug)]
pub enum NativeBuildError {
    #[error("Toolchain `{program}` not available: {reason}")]
    ToolchainNotFound { program: String, reason: String },

    #[error("Invalid toolchain arguments `{raw}`: {reason}")]
    InvalidArguments { raw: String, reason: String },

    #[error("Failed to prepare build workspace {path}: {reason}")]
    Workspace { path: String, reason: String },

    #[error("Failed to start toolchain `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Toolchain exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Toolchain timed out after {timeout_secs}s: {stderr}")]
    Timeout { timeout_secs: u64, stderr: String },

    #[error("Toolchain reported success but produced no output at {expected_path}")]
    MissingOutput { expected_path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("Malformed WASM input: {reason}")]
    Malformed { reason: String },

    #[error("Optimizer produced invalid WASM: {reason}")]
    InvalidOutput { reason: String },

    #[error("wasm-opt failed ({status}): {stderr}")]
    ExternalTool { status: String, stderr: String },

    #[error("wasm-opt did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("wasm-opt at {path} is not usable: {reason}")]
    ToolUnavailable { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}
